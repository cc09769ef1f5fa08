use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use converge::{ConflictPolicy, FailurePolicy, Mode, ObjectKind, RulePosition, Scope};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "polsync")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge a policy device to declared configuration objects", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the changes needed to converge (read-only)
    Plan(PlanArgs),

    /// Converge the device to the declared objects
    Reconcile(ReconcileArgs),

    /// Copy objects and their dependencies from one scope to another
    Copy(CopyArgs),

    /// Release config and commit locks left by an aborted run
    Unlock(UnlockArgs),

    /// Inspect the polsync config file
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct DeviceArgs {
    /// Device snapshot file
    #[arg(short, long, env = "POLSYNC_DEVICE")]
    pub device: PathBuf,
}

#[derive(Args)]
pub struct SelectionArgs {
    /// Declared state (.json or .toml)
    #[arg(long)]
    pub desired: PathBuf,

    /// Limit to these scopes (repeatable); default: every declared scope
    #[arg(short, long = "scope")]
    pub scopes: Vec<Scope>,

    /// Limit to these kinds (repeatable); default: every kind
    #[arg(short, long = "kind")]
    pub kinds: Vec<ObjectKind>,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Show a line diff for replaced objects
    #[arg(long)]
    pub diff: bool,
}

#[derive(Args)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Mode for batches after the first: strict or relaxed
    #[arg(long)]
    pub mode: Option<Mode>,

    /// On batch failure: hard (abort, keep locks) or soft (continue)
    #[arg(long)]
    pub failure_policy: Option<FailurePolicy>,

    /// Dry run - show what would be done
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct CopyArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Source scope
    #[arg(long)]
    pub from: Scope,

    /// Destination scope
    #[arg(long)]
    pub to: Scope,

    /// Copy every security rule carrying this tag
    #[arg(long, conflicts_with = "roots", required_unless_present = "roots")]
    pub tag: Option<String>,

    /// Copy this object, as KIND:NAME (repeatable)
    #[arg(long = "root", value_parser = parse_root)]
    pub roots: Vec<(ObjectKind, String)>,

    /// When the object already exists at the destination: skip or overwrite
    #[arg(long)]
    pub on_conflict: Option<ConflictPolicy>,

    /// Where copied rules go: top, bottom, before:RULE or after:RULE
    #[arg(long, default_value = "bottom")]
    pub position: RulePosition,

    /// On batch failure: hard (abort, keep locks) or soft (continue)
    #[arg(long)]
    pub failure_policy: Option<FailurePolicy>,

    /// Dry run - show what would be done
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct UnlockArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Scopes to unlock (repeatable)
    #[arg(short, long = "scope", required = true)]
    pub scopes: Vec<Scope>,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Print the config file location
    Path,
}

fn parse_root(value: &str) -> Result<(ObjectKind, String), String> {
    let (kind, name) = value
        .split_once(':')
        .ok_or_else(|| format!("expected KIND:NAME, got '{value}'"))?;
    let kind: ObjectKind = kind.parse().map_err(|e: converge::Error| e.to_string())?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing object name in '{value}'"));
    }
    Ok((kind, name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_root() {
        assert_eq!(
            parse_root("address-group:web-servers").unwrap(),
            (ObjectKind::AddressGroup, "web-servers".to_string())
        );
        assert!(parse_root("web-servers").is_err());
        assert!(parse_root("address:").is_err());
        assert!(parse_root("gadget:x").is_err());
    }

    #[test]
    fn test_reconcile_args() {
        let cli = Cli::try_parse_from([
            "polsync",
            "reconcile",
            "--device",
            "device.json",
            "--desired",
            "desired.toml",
            "--scope",
            "device-group:branch",
            "--kind",
            "address",
            "--failure-policy",
            "soft",
            "--yes",
        ])
        .unwrap();
        let Command::Reconcile(args) = cli.command else {
            panic!("expected reconcile");
        };
        assert_eq!(
            args.selection.scopes,
            vec![Scope::DeviceGroup("branch".to_string())]
        );
        assert_eq!(args.selection.kinds, vec![ObjectKind::Address]);
        assert_eq!(args.failure_policy, Some(FailurePolicy::Soft));
        assert!(args.yes);
    }

    #[test]
    fn test_copy_requires_roots_or_tag() {
        let missing = Cli::try_parse_from([
            "polsync", "copy", "-d", "dev.json", "--from", "dg:a", "--to", "dg:b",
        ]);
        assert!(missing.is_err());

        let by_tag = Cli::try_parse_from([
            "polsync", "copy", "-d", "dev.json", "--from", "dg:a", "--to", "dg:b", "--tag",
            "migrate",
        ])
        .unwrap();
        let Command::Copy(args) = by_tag.command else {
            panic!("expected copy");
        };
        assert_eq!(args.position, RulePosition::Bottom);
    }

    #[test]
    fn test_copy_position() {
        let cli = Cli::try_parse_from([
            "polsync", "copy", "-d", "dev.json", "--from", "dg:a", "--to", "dg:b", "--tag",
            "migrate", "--position", "after:allow-dns",
        ])
        .unwrap();
        let Command::Copy(args) = cli.command else {
            panic!("expected copy");
        };
        assert_eq!(args.position, RulePosition::After("allow-dns".to_string()));

        let bad = Cli::try_parse_from([
            "polsync", "copy", "-d", "dev.json", "--from", "dg:a", "--to", "dg:b", "--tag",
            "migrate", "--position", "middle",
        ]);
        assert!(bad.is_err());
    }
}
