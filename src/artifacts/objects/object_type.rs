use anyhow::Context;
use std::io::BufRead;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Blob,
    Tree,
    Changeset,
}

impl ObjectType {
    pub fn as_str(&self) -> &str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Changeset => "changeset",
        }
    }

    /// Consume the `<type> <size>\0` envelope
    ///
    /// Returns the type and the content size the envelope announces.
    pub fn read_envelope(reader: &mut impl BufRead) -> anyhow::Result<(ObjectType, usize)> {
        let mut header = Vec::new();
        reader.read_until(b'\0', &mut header)?;
        if header.pop() != Some(b'\0') {
            anyhow::bail!("object envelope is not terminated");
        }

        let header = std::str::from_utf8(&header).context("object envelope is not utf-8")?;
        let (object_type, size) = header
            .split_once(' ')
            .with_context(|| format!("malformed object envelope {header:?}"))?;
        let size = size
            .parse::<usize>()
            .with_context(|| format!("malformed object size {size:?}"))?;

        Ok((object_type.parse()?, size))
    }
}

impl FromStr for ObjectType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "changeset" => Ok(ObjectType::Changeset),
            _ => Err(anyhow::anyhow!("unknown object type {value:?}")),
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::io::{Cursor, Read};

    #[rstest]
    fn envelope_is_consumed_up_to_the_content() -> anyhow::Result<()> {
        let mut reader = Cursor::new(b"changeset 5\0hello".to_vec());

        let envelope = ObjectType::read_envelope(&mut reader)?;
        let mut rest = String::new();
        reader.read_to_string(&mut rest)?;

        assert_eq!(envelope, (ObjectType::Changeset, 5));
        assert_eq!(rest, "hello");
        Ok(())
    }

    #[rstest]
    #[case::unknown_type(b"commit 3\0abc".to_vec())]
    #[case::bad_size(b"blob x\0abc".to_vec())]
    #[case::unterminated(b"blob 3".to_vec())]
    fn malformed_envelopes_are_rejected(#[case] data: Vec<u8>) {
        assert!(ObjectType::read_envelope(&mut Cursor::new(data)).is_err());
    }
}
