use clap::Parser;
use globset::Glob;
use std::{env, path::PathBuf, process};
use tasklab_exercises::{register_all, suite::plan, suites, task_ids};
use tasklab_runner::{
    config::{ModeConfig, Settings},
    fixture::FixtureLoader,
    CaseReport, Communicator, Harness, LocalWorld, Registry, Summary,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tracing_unwrap::{OptionExt, ResultExt};

/// Run the reference exercises through the harness inside an in-process world
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// settings file
    #[arg(short, long, default_value = "tasklab.yaml")]
    config: PathBuf,

    /// number of ranks, overrides `world_size`
    #[arg(short = 'n', long)]
    world_size: Option<usize>,

    /// functional or performance, overrides `mode`
    #[arg(short, long)]
    mode: Option<ModeConfig>,

    /// only run exercises whose id matches this glob
    #[arg(short, long)]
    filter: Option<String>,

    /// repetitions in performance mode, overrides `performance.repetitions`
    #[arg(short, long)]
    repetitions: Option<usize>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(world_size) = self.world_size {
            settings.world_size = world_size;
        }
        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        if let Some(repetitions) = self.repetitions {
            settings.performance.repetitions = repetitions;
        }
    }
}

fn lookup(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.config).unwrap_or_log();
    settings.apply_overrides(lookup).unwrap_or_log();
    cli.apply(&mut settings);

    if settings.preflight_checks(&task_ids()) {
        error!("Settings contain errors, see above");
        process::exit(1);
    }

    let mut builder = Registry::builder();
    register_all(&mut builder, &settings, &lookup).unwrap_or_log();
    let registry = builder.build().install().unwrap_or_log();

    let fixtures = FixtureLoader::from_settings(&settings)
        .and_then(|loader| loader.load())
        .unwrap_or_log();
    let filter = cli
        .filter
        .as_deref()
        .map(|pattern| Glob::new(pattern).map(|glob| glob.compile_matcher()))
        .transpose()
        .unwrap_or_log();

    let parameters =
        plan(&suites(), registry, &settings, &fixtures, filter.as_ref()).unwrap_or_log();
    let harness = Harness::new(settings.harness_mode(), settings.elected_rank);

    let mut world = LocalWorld::new(settings.world_size);
    if let Some(timeout) = settings.timeout() {
        world = world.with_timeout(timeout);
    }

    info!(
        world_size = world.size(),
        parameters = parameters.len(),
        mode = ?harness.mode(),
        "Running"
    );
    let per_rank = world
        .run(|transport| {
            let comm = Communicator::new(transport, settings.collectives);
            harness.execute_all(&parameters, &comm)
        })
        .unwrap_or_log()
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap_or_log();

    let mut summary = Summary::default();
    for index in 0..parameters.len() {
        let report = CaseReport::merge(per_rank.iter().map(|reports| reports[index].clone()))
            .expect_or_log("every rank reports every parameter");
        println!("{report}");
        summary.record(&report);
    }

    summary.log();
    println!("{summary}");

    process::exit(if summary.is_success() { 0 } else { 1 });
}
