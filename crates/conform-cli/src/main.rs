use std::path::PathBuf;

use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use conform_core::{
    days_until_due, default_due_date, Actor, CriteriaId, Evaluation, EvaluationId, Followup, FollowupFilter,
    FollowupId, FollowupStatus, ImportDefaults, InstitutionId, NewFollowup, Role, UserId,
};
use conform_service::Service;

#[derive(Parser)]
#[command(name = "conform", version)]
struct Cli {
    /// Data directory holding conform.toml and the database
    #[arg(long, global = true, default_value = ".conform")]
    data_dir: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the data directory, config and database
    Init,

    /// Import and inspect audit engine output
    #[command(subcommand)]
    Evaluation(EvaluationCmd),

    /// Per-dimension breakdown of an evaluation
    Aggregate {
        evaluation: String,
        /// Print the full view as JSON
        #[arg(long)]
        json: bool,
    },

    /// Criteria that can receive a followup (fail or partial)
    Noncompliant { evaluation: String },

    /// Remediation followups
    #[command(subcommand)]
    Followup(FollowupCmd),
}

#[derive(Subcommand)]
enum EvaluationCmd {
    /// Import an evaluation JSON file
    Import {
        file: PathBuf,
        /// Owning institution, used when the file does not name one
        #[arg(long)]
        institution: Option<String>,
        /// Evaluation id, used when the file has none; generated otherwise
        #[arg(long)]
        id: Option<String>,
    },
    /// Show one evaluation, or list all when no id is given
    Show { id: Option<String> },
}

#[derive(Args, Clone)]
struct ActorArgs {
    #[arg(long)]
    role: String,
    #[arg(long)]
    user: String,
    /// Required for entity_user
    #[arg(long)]
    institution: Option<String>,
}

#[derive(Args)]
struct ObservedArg {
    /// Status the caller last saw; defaults to the stored status
    #[arg(long)]
    observed: Option<String>,
}

#[derive(Subcommand)]
enum FollowupCmd {
    Create {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        evaluation: String,
        #[arg(long)]
        criteria: String,
        /// YYYY-MM-DD; defaults to today + followups.default_due_days
        #[arg(long)]
        due: Option<NaiveDate>,
        #[arg(long)]
        notes: Option<String>,
    },
    Correct {
        id: String,
        #[command(flatten)]
        actor: ActorArgs,
        #[command(flatten)]
        observed: ObservedArg,
        #[arg(long)]
        notes: Option<String>,
    },
    Validate {
        id: String,
        #[command(flatten)]
        actor: ActorArgs,
        #[command(flatten)]
        observed: ObservedArg,
        /// Reject instead of approve
        #[arg(long)]
        reject: bool,
        #[arg(long)]
        notes: Option<String>,
    },
    Cancel {
        id: String,
        #[command(flatten)]
        actor: ActorArgs,
        #[command(flatten)]
        observed: ObservedArg,
    },
    List {
        #[arg(long)]
        evaluation: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        institution: Option<String>,
    },
    Overdue {
        #[arg(long)]
        institution: Option<String>,
    },
    Stats {
        #[arg(long)]
        evaluation: Option<String>,
        #[arg(long)]
        institution: Option<String>,
    },
    History { id: String },
}

impl ActorArgs {
    fn actor(&self) -> anyhow::Result<Actor> {
        let role = Role::parse(&self.role).ok_or_else(|| anyhow!("unknown role: {}", self.role))?;
        if !role.is_staff() && self.institution.is_none() {
            return Err(anyhow!("--institution is required for entity_user"));
        }
        Ok(Actor {
            user_id: UserId::from_str(self.user.clone()),
            role,
            institution_id: self.institution.clone().map(InstitutionId::from_str),
        })
    }
}

fn parse_status(s: &str) -> anyhow::Result<FollowupStatus> {
    FollowupStatus::parse(s).ok_or_else(|| anyhow!("unknown status: {s}"))
}

fn observed_status(svc: &Service, id: &FollowupId, arg: &ObservedArg) -> anyhow::Result<FollowupStatus> {
    match &arg.observed {
        Some(s) => parse_status(s),
        None => Ok(svc.followup(id)?.status),
    }
}

fn print_followup(f: &Followup) {
    let today = conform_service::today();
    println!(
        "- {} [{}] {} / {} due {} ({} days)",
        f.id,
        f.status,
        f.evaluation_id,
        f.criteria_result_id,
        f.due_date,
        days_until_due(f, today)
    );
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir;
    debug!(data_dir = %data_dir.display(), "starting");

    match cli.cmd {
        Command::Init => {
            Service::init_dir(&data_dir)?;
            println!("Initialized conform in {}", data_dir.display());
        }
        Command::Evaluation(EvaluationCmd::Import { file, institution, id }) => {
            let svc = Service::open(data_dir)?;
            let raw = std::fs::read_to_string(&file).with_context(|| format!("read {}", file.display()))?;
            let defaults = ImportDefaults {
                id: id.map(EvaluationId::from_str),
                institution_id: institution.map(InstitutionId::from_str),
            };
            let evaluation = Evaluation::from_engine_json(&raw, &defaults)?;
            svc.import_evaluation(&evaluation)?;
            println!("Imported evaluation {} ({} criteria)", evaluation.id, evaluation.criteria_results.len());
        }
        Command::Evaluation(EvaluationCmd::Show { id: Some(id) }) => {
            let svc = Service::open(data_dir)?;
            let e = svc.evaluation(&EvaluationId::from_str(id))?;
            println!("{} {} [{}] at {}", e.id, e.url, e.institution_id, e.timestamp);
            println!("Total: {:.1}%", e.scores.total());
            println!("Criteria: {}", e.criteria_results.len());
        }
        Command::Evaluation(EvaluationCmd::Show { id: None }) => {
            let svc = Service::open(data_dir)?;
            let all = svc.evaluations()?;
            println!("Evaluations: {}", all.len());
            for e in all {
                println!("- {} {} [{}] {:.1}%", e.id, e.url, e.institution_id, e.scores.total());
            }
        }
        Command::Aggregate { evaluation, json } => {
            let svc = Service::open(data_dir)?;
            let dims = svc.aggregate(&EvaluationId::from_str(evaluation))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&dims)?);
            } else {
                for (key, v) in &dims {
                    println!(
                        "{:<14} {:>6.1}%  pass {} fail {} partial {} na {} (total {})",
                        key, v.percentage, v.passed_count, v.failed_count, v.partial_count, v.na_count, v.total_count
                    );
                }
            }
        }
        Command::Noncompliant { evaluation } => {
            let svc = Service::open(data_dir)?;
            let targets = svc.non_compliant(&EvaluationId::from_str(evaluation))?;
            println!("Non-compliant criteria: {}", targets.len());
            for r in targets {
                println!("- {} [{}] {}", r.criteria_id, r.status, r.dimension);
            }
        }
        Command::Followup(cmd) => run_followup(Service::open(data_dir)?, cmd)?,
    }

    Ok(())
}

fn run_followup(svc: Service, cmd: FollowupCmd) -> anyhow::Result<()> {
    let now = conform_service::now();
    match cmd {
        FollowupCmd::Create { actor, evaluation, criteria, due, notes } => {
            let due_date = due.unwrap_or_else(|| default_due_date(now.date_naive(), svc.cfg.followups.default_due_days));
            let req = NewFollowup { criteria_id: CriteriaId::from_str(criteria), due_date, notes };
            let f = svc.create_followup(&actor.actor()?, &EvaluationId::from_str(evaluation), req, now)?;
            println!("Created followup {} due {}", f.id, f.due_date);
        }
        FollowupCmd::Correct { id, actor, observed, notes } => {
            let id = FollowupId::from_str(id);
            let seen = observed_status(&svc, &id, &observed)?;
            let f = svc.mark_corrected(&actor.actor()?, &id, seen, notes, now)?;
            println!("Followup {} is now {}", f.id, f.status);
        }
        FollowupCmd::Validate { id, actor, observed, reject, notes } => {
            let id = FollowupId::from_str(id);
            let seen = observed_status(&svc, &id, &observed)?;
            let f = svc.validate(&actor.actor()?, &id, seen, !reject, notes, now)?;
            println!("Followup {} is now {}", f.id, f.status);
        }
        FollowupCmd::Cancel { id, actor, observed } => {
            let id = FollowupId::from_str(id);
            let seen = observed_status(&svc, &id, &observed)?;
            let f = svc.cancel(&actor.actor()?, &id, seen, now)?;
            println!("Followup {} is now {}", f.id, f.status);
        }
        FollowupCmd::List { evaluation, status, institution } => {
            let filter = FollowupFilter {
                evaluation_id: evaluation.map(EvaluationId::from_str),
                status: status.as_deref().map(parse_status).transpose()?,
                institution_id: institution.map(InstitutionId::from_str),
            };
            let all = svc.followups(&filter)?;
            println!("Followups: {}", all.len());
            for f in &all {
                print_followup(f);
            }
        }
        FollowupCmd::Overdue { institution } => {
            let filter = FollowupFilter { institution_id: institution.map(InstitutionId::from_str), ..Default::default() };
            let overdue = svc.overdue(&filter, now)?;
            println!("Overdue: {}", overdue.len());
            for f in &overdue {
                print_followup(f);
            }
        }
        FollowupCmd::Stats { evaluation, institution } => {
            let filter = FollowupFilter {
                evaluation_id: evaluation.map(EvaluationId::from_str),
                institution_id: institution.map(InstitutionId::from_str),
                ..Default::default()
            };
            let stats = svc.stats(&filter, now)?;
            println!("Total: {}", stats.total);
            for status in FollowupStatus::ALL {
                println!("{:<10} {}", status.as_str(), stats.count(status));
            }
            println!("Overdue: {}", stats.overdue);
        }
        FollowupCmd::History { id } => {
            let history = svc.history(&FollowupId::from_str(id))?;
            for r in history {
                let from = r.from.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
                println!("{} {} {} -> {} by {} ({})", r.at, r.kind, from, r.to, r.actor_id, r.actor_role);
            }
        }
    }
    Ok(())
}
