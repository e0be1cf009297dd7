use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use deckbuild::{Project, ScriptBundler, Toolchain};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum TaskName {
    Js,
    JsEs6,
    Plugins,
    Css,
    CssThemes,
    CssCore,
    Default,
    Build,
    Package,
    Reload,
    Serve,
}

impl TaskName {
    fn as_str(self) -> &'static str {
        match self {
            TaskName::Js => "js",
            TaskName::JsEs6 => "js-es6",
            TaskName::Plugins => "plugins",
            TaskName::Css => "css",
            TaskName::CssThemes => "css-themes",
            TaskName::CssCore => "css-core",
            TaskName::Default => "default",
            TaskName::Build => "build",
            TaskName::Package => "package",
            TaskName::Reload => "reload",
            TaskName::Serve => "serve",
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Task to run.
    #[clap(value_enum, index = 1, default_value = "default")]
    task: TaskName,

    /// Project directory.
    #[clap(long, default_value = ".")]
    project: Utf8PathBuf,

    /// Directory exposed by the dev server.
    #[clap(long)]
    root: Option<Utf8PathBuf>,

    /// Port of the dev server.
    #[clap(long)]
    port: Option<u16>,

    /// List the registered tasks and exit.
    #[clap(long)]
    list: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let mut project = Project::load(args.project.canonicalize_utf8()?)?;
    if let Some(root) = args.root {
        project.serve.root = root;
    }
    if let Some(port) = args.port {
        project.serve.port = port;
    }

    let toolchain = Arc::new(Toolchain::new(project, ScriptBundler::default()));
    let graph = deckbuild::tasks::standard(toolchain)?;

    if args.list {
        for name in graph.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let diagnostics = graph.run(args.task.as_str())?;
    eprintln!("{diagnostics}");

    Ok(())
}

fn init_logging() {
    let indicatif = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .init();
}
