//! Cross-filesystem name portability
//!
//! A working copy on a case-sensitive Linux filesystem can happily hold `README` and `readme`
//! side by side; checking the same tree out on macOS or Windows cannot. The rules below describe
//! the target filesystems a repository wants to stay compatible with. Folding rules (case,
//! Unicode normalization, trailing dots/spaces) detect names that would collapse into one;
//! validity rules reject names a target filesystem cannot represent at all.

pub mod collider;

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PortabilityFlags: u32 {
        /// Names equal under Unicode lowercase folding collide
        const CASE = 1 << 0;
        /// Names equal after NFC normalization collide
        const NORMALIZATION = 1 << 1;
        /// Trailing dots and spaces are dropped by Windows; such names are invalid and collide
        const TRAILING_DOT_SPACE = 1 << 2;
        /// CON, PRN, AUX, NUL, COM1-9 and LPT1-9 (with any extension) are invalid
        const WIN_RESERVED = 1 << 3;
        /// `<>:"\|?*` and control characters are invalid
        const WIN_INVALID_CHARS = 1 << 4;
        /// Names longer than 255 bytes are invalid
        const MAX_LENGTH = 1 << 5;
    }
}

pub const MAX_ENTRYNAME_BYTES: usize = 255;

pub const WIN_RESERVED_NAMES: phf::Set<&'static str> = phf::phf_set! {
    "CON", "PRN", "AUX", "NUL",
    "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9",
    "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
};

pub const WIN_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '\\', '|', '?', '*'];
