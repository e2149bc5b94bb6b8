use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use grove::areas::repository::Repository;
use grove::areas::working_copy::WorkingCopy;
use grove::artifacts::branch::branch_name::BranchPolicy;
use grove::artifacts::status::status_record::StatusRecord;
use grove::commands::porcelain::resolve::ResolveChoice;
use grove::commands::porcelain::revert::RevertFilters;
use grove::config::LoggingConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "grove",
    version = "0.1.0",
    about = "A working-copy engine for a distributed version-control system",
    long_about = "grove checks changesets out of a repository into working copies, tracks \
    local edits in a metadata store and moves working copies between changesets with \
    update, merge, commit and revert.",
    help_template = r"
{name} {version} - {about}

USAGE:
    {usage}

OPTIONS:
    {all-args}
",
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(name = "init", about = "Create a new repository")]
    Init {
        #[arg(index = 1, help = "The path to the repository")]
        path: PathBuf,
    },
    #[command(
        name = "checkout",
        about = "Create a working copy of a changeset",
        long_about = "This command creates a working copy at <path> from the repository at <repo>. \
        Items matching a sparse pattern are recorded but not written to disk."
    )]
    Checkout {
        #[arg(index = 1, help = "The path to the repository")]
        repo: PathBuf,
        #[arg(index = 2, help = "Where to create the working copy")]
        path: PathBuf,
        #[arg(long, help = "Branch or changeset id to check out")]
        rev: Option<String>,
        #[arg(long, help = "Path pattern to leave out of the working tree")]
        sparse: Vec<String>,
    },
    #[command(name = "status", about = "Show pending changes")]
    Status {
        paths: Vec<PathBuf>,
        #[arg(long, help = "How many levels below each path to report")]
        depth: Option<usize>,
    },
    #[command(name = "add", about = "Put files under version control")]
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    #[command(name = "remove", about = "Remove items from version control")]
    Remove {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, help = "Leave the files on disk")]
        keep: bool,
        #[arg(long, help = "Remove even locally modified items")]
        force: bool,
    },
    #[command(name = "move", about = "Move items into a directory or to a new path")]
    Move {
        #[arg(num_args = 2.., required = true, help = "Sources followed by the destination")]
        paths: Vec<PathBuf>,
    },
    #[command(name = "rename", about = "Rename an item in place")]
    Rename { path: PathBuf, name: String },
    #[command(name = "commit", about = "Record pending changes as a new changeset")]
    Commit {
        #[arg(short, long, help = "The commit message")]
        message: String,
        #[arg(long, help = "How many levels below each path to commit")]
        depth: Option<usize>,
        #[arg(help = "Commit only the changes at or below these paths")]
        paths: Vec<PathBuf>,
    },
    #[command(name = "update", about = "Move the working copy to another changeset")]
    Update {
        #[arg(long, help = "Branch or changeset id; the attached branch by default")]
        rev: Option<String>,
        #[arg(long, help = "Carry pending changes over")]
        allow_dirty: bool,
    },
    #[command(name = "merge", about = "Merge a changeset into the working copy")]
    Merge {
        rev: String,
        #[arg(long)]
        allow_dirty: bool,
        #[arg(long, help = "Leave content conflicts for manual resolution")]
        no_auto_merge: bool,
    },
    #[command(name = "revert", about = "Undo pending changes")]
    Revert {
        paths: Vec<PathBuf>,
        #[arg(
            long = "filter",
            help = "Kind of change to undo (added, deleted, modified, attrbits, renamed, moved, lost, merge-created)"
        )]
        filters: Vec<String>,
    },
    #[command(name = "resolve", about = "Mark conflicts resolved")]
    Resolve {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, default_value = "merged", help = "baseline, other, merged or working")]
        choice: ResolveChoice,
    },
    #[command(name = "branch", about = "Attach the working copy to a branch")]
    Branch {
        name: Option<String>,
        #[arg(long, conflicts_with = "name")]
        detach: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let pwd = std::env::current_dir()?;
    let found = WorkingCopy::find(&pwd);
    let logging = found
        .as_ref()
        .map(|wc| wc.config().logging.clone())
        .unwrap_or_else(|_| LoggingConfig::default());
    grove::logging::init(&logging)?;

    match cli.command {
        Commands::Init { path } => {
            let repository = Repository::init(&path)?;
            println!("Initialized empty repository in {}", repository.path().display());
        }
        Commands::Checkout {
            repo,
            path,
            rev,
            sparse,
        } => {
            let wc = WorkingCopy::checkout(&repo, &path, rev.as_deref(), &sparse)?;
            println!("Checked out into {}", wc.root().display());
        }
        Commands::Status { paths, depth } => {
            let mut wc = found?;
            let paths = repo_paths(&wc, &paths)?;
            print_records(&wc.status(&paths, depth)?);
        }
        Commands::Add { paths } => {
            let mut wc = found?;
            let paths = repo_paths(&wc, &paths)?;
            print_records(&wc.add(&paths)?);
        }
        Commands::Remove { paths, keep, force } => {
            let mut wc = found?;
            let paths = repo_paths(&wc, &paths)?;
            print_records(&wc.remove(&paths, keep, force)?);
        }
        Commands::Move { paths } => {
            let mut wc = found?;
            let mut paths = repo_paths(&wc, &paths)?;
            let destination = paths
                .pop()
                .ok_or_else(|| anyhow::anyhow!("name a destination"))?;
            print_records(&wc.move_items(&paths, &destination)?);
        }
        Commands::Rename { path, name } => {
            let mut wc = found?;
            let path = wc.repo_path(&path)?;
            print_records(&wc.rename(&path, &name)?);
        }
        Commands::Commit {
            message,
            depth,
            paths,
        } => {
            let mut wc = found?;
            let paths = repo_paths(&wc, &paths)?;
            let selection = (!paths.is_empty()).then_some(paths.as_slice());
            let changeset = wc.commit(selection, &message, depth)?;
            println!("Committed {}", changeset.to_short_oid().yellow());
        }
        Commands::Update { rev, allow_dirty } => {
            let mut wc = found?;
            let changeset = wc.update(rev.as_deref(), allow_dirty)?;
            println!("Updated to {}", changeset.to_short_oid().yellow());
        }
        Commands::Merge {
            rev,
            allow_dirty,
            no_auto_merge,
        } => {
            let mut wc = found?;
            let report = wc.merge(&rev, allow_dirty, no_auto_merge)?;
            if report.is_up_to_date() {
                println!("Already up to date");
            } else {
                for (path, conflict) in &report.conflicts {
                    let code = match conflict.is_resolved() {
                        true => "r".green(),
                        false => "C".red().bold(),
                    };
                    println!("{code} {} ({})", path.display(), conflict.summary());
                }
                println!(
                    "Merged {}; {} unresolved",
                    report.target.to_short_oid().yellow(),
                    report.unresolved().count()
                );
            }
        }
        Commands::Revert { paths, filters } => {
            let mut wc = found?;
            let paths = repo_paths(&wc, &paths)?;
            let filters = match filters.is_empty() {
                true => RevertFilters::all(),
                false => filters
                    .iter()
                    .map(|name| RevertFilters::parse(name))
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .fold(RevertFilters::empty(), |all, filter| all | filter),
            };
            let selection = (!paths.is_empty()).then_some(paths.as_slice());
            print_records(&wc.revert(selection, filters)?);
        }
        Commands::Resolve { paths, choice } => {
            let mut wc = found?;
            let paths = repo_paths(&wc, &paths)?;
            print_records(&wc.resolve(&paths, choice)?);
        }
        Commands::Branch { name, detach } => {
            let mut wc = found?;
            match (name, detach) {
                (_, true) => {
                    wc.detach_branch()?;
                    println!("Detached");
                }
                (Some(name), false) => {
                    let branch = wc.attach_branch(&name, BranchPolicy::Validate)?;
                    println!("Attached to {}", branch.as_ref().green());
                }
                (None, false) => anyhow::bail!("name a branch or pass --detach"),
            }
        }
    }

    Ok(())
}

fn repo_paths(wc: &WorkingCopy, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    paths.iter().map(|path| wc.repo_path(path)).collect()
}

fn colored_code(record: &StatusRecord) -> ColoredString {
    let code = record.code();
    match code.chars().next() {
        Some('C') => code.red().bold(),
        Some('A') => code.green(),
        Some('D') | Some('!') => code.red(),
        Some('R') => code.cyan(),
        Some('?') | Some('#') => code.bright_black(),
        _ if code.ends_with('M') || code.ends_with('X') => code.yellow(),
        _ => code.normal(),
    }
}

fn print_records(records: &[StatusRecord]) {
    for record in records {
        let path = match &record.baseline_path {
            Some(from) if from != &record.path => {
                format!("{} (from {})", record.path.display(), from.display())
            }
            _ => record.path.display().to_string(),
        };
        println!("{} {path}", colored_code(record));
    }
}
