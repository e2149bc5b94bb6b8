use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::merge::conflict::ConflictFacets;
use crate::artifacts::status::status_record::StatusRecord;
use crate::error::WcError;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info_span};

/// Which version of a conflicted file to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveChoice {
    /// The working copy's side before the merge
    Baseline,
    /// The merged-in side
    Other,
    /// The merge tool's result
    Merged,
    /// Whatever is on disk now
    Working,
}

impl FromStr for ResolveChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "baseline" | "mine" => Ok(ResolveChoice::Baseline),
            "other" | "theirs" => Ok(ResolveChoice::Other),
            "merged" => Ok(ResolveChoice::Merged),
            "working" => Ok(ResolveChoice::Working),
            _ => anyhow::bail!("unknown resolve choice {s:?}"),
        }
    }
}

impl std::fmt::Display for ResolveChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResolveChoice::Baseline => "baseline",
            ResolveChoice::Other => "other",
            ResolveChoice::Merged => "merged",
            ResolveChoice::Working => "working",
        };
        write!(f, "{name}")
    }
}

impl WorkingCopy {
    /// Mark the conflicts on `paths` resolved, writing the chosen version of conflicted content
    pub fn resolve(
        &mut self,
        paths: &[PathBuf],
        choice: ResolveChoice,
    ) -> anyhow::Result<Vec<StatusRecord>> {
        let span = info_span!("resolve", root = %self.root().display(), %choice);
        let _guard = span.enter();

        let mut tx = self.begin()?;
        let mut resolved = Vec::new();

        for path in paths {
            tx.wc().check_cancelled()?;
            let alias = tx.controlled_at(path)?;
            let item = tx.view().get(alias)?;
            let mut conflict = item
                .issue
                .clone()
                .ok_or_else(|| WcError::NotFound(format!("no conflict on {}", path.display())))?;
            let (item_type, sparse, live) = (item.item_type, item.is_sparse(), item.is_live());

            if conflict.facets.contains(ConflictFacets::CONTENTS) && live {
                let chosen = match choice {
                    ResolveChoice::Baseline => Some(conflict.hids.baseline.clone()),
                    ResolveChoice::Other => Some(conflict.hids.other.clone()),
                    ResolveChoice::Merged => Some(conflict.result_hid.clone()),
                    ResolveChoice::Working => None,
                };
                if let Some(chosen) = chosen {
                    let hid = chosen.ok_or_else(|| {
                        WcError::NotFound(format!("no {choice} version of {}", path.display()))
                    })?;
                    let (wc, view) = tx.parts();
                    let current = match sparse {
                        true => None,
                        false => view.current_hid(wc, alias)?,
                    };
                    if current.as_ref() != Some(&hid) {
                        let attrbits = view.current_attrbits(wc, alias)?.unwrap_or_default();
                        let path = view.path_of(alias)?;
                        tx.queue(JournalStep::OverwriteFromStore {
                            alias,
                            path,
                            item_type,
                            hid,
                            attrbits,
                            sparse,
                        });
                    }
                }
            }

            conflict.resolve_all();
            tx.queue(JournalStep::SetIssue {
                alias,
                conflict: Box::new(conflict),
            });
            resolved.push(tx.path_of(alias)?);
        }
        tx.apply()?;
        let records = self.records_at(&resolved)?;

        debug!(resolved = records.len(), "resolved conflicts");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("baseline", ResolveChoice::Baseline)]
    #[case("theirs", ResolveChoice::Other)]
    #[case("Merged", ResolveChoice::Merged)]
    #[case("working", ResolveChoice::Working)]
    fn choices_parse(#[case] name: &str, #[case] expected: ResolveChoice) {
        assert_eq!(name.parse::<ResolveChoice>().unwrap(), expected);
    }
}
