//! asg-run - загрузить и выполнить модуль ASG со всеми зависимостями.
//!
//! Использование:
//!   asg-run <entry>                      - импортировать модуль
//!   asg-run <entry> --config <file>      - с конфигурацией модулей (JSON)
//!   asg-run <entry> --namespace          - напечатать пространство имён
//!   asg-run --help                       - справка

use std::env;
use std::path::{Path, PathBuf};
use std::process;

use futures::executor::block_on;

use asg_linker::{LoaderResult, ModuleConfig, ModuleLoader, Namespace};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP: &str = r#"
asg-run - ASG module runner

USAGE:
    asg-run <entry> [OPTIONS]

OPTIONS:
    --config, -c <file>   Module configuration (JSON)
    --namespace, -n       Print the entry namespace as JSON
    --help, -h            Show this help
    --version, -v         Show version

ENVIRONMENT:
    RUST_LOG              Log level (e.g. RUST_LOG=debug)

EXAMPLES:
    asg-run ./main.asg
    asg-run app/main --config modules.json --namespace
"#;

#[derive(Debug, Default)]
struct Options {
    entry: Option<String>,
    config: Option<PathBuf>,
    namespace: bool,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                println!("{}", HELP);
                process::exit(0);
            }
            "--version" | "-v" => {
                println!("asg-run {}", VERSION);
                process::exit(0);
            }
            "--config" | "-c" => {
                let path = iter
                    .next()
                    .ok_or_else(|| format!("{} requires a file argument", arg))?;
                options.config = Some(PathBuf::from(path));
            }
            "--namespace" | "-n" => options.namespace = true,
            flag if flag.starts_with('-') => return Err(format!("Unknown option: {}", flag)),
            entry => {
                if options.entry.replace(entry.to_string()).is_some() {
                    return Err("Only one entry module can be given.".to_string());
                }
            }
        }
    }

    Ok(options)
}

/// Спецификатор входного модуля: пути без `./` считаются относительными
/// к текущему каталогу, а не именами из путей поиска.
fn entry_specifier(entry: &str) -> String {
    if entry.starts_with("./") || entry.starts_with("../") || Path::new(entry).is_absolute() {
        entry.to_string()
    } else if Path::new(entry).exists() {
        format!("./{}", entry)
    } else {
        entry.to_string()
    }
}

fn run(options: &Options, entry: &str) -> LoaderResult<Namespace> {
    let config = match &options.config {
        Some(path) => ModuleConfig::from_json_file(path)?,
        None => ModuleConfig::default(),
    };
    log::debug!("Module config: {:?}", config);

    let loader = ModuleLoader::from_config(&config);
    loader.context().set_echo(true);
    block_on(loader.import(&entry_specifier(entry), None))
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            eprintln!("Use --help for usage information.");
            process::exit(1);
        }
    };

    let Some(entry) = options.entry.as_deref() else {
        eprintln!("No entry module given.");
        eprintln!("Use --help for usage information.");
        process::exit(1);
    };

    match run(&options, entry) {
        Ok(namespace) => {
            if options.namespace {
                match serde_json::to_string_pretty(&namespace.to_json()) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("Failed to serialize namespace: {}", e);
                        process::exit(1);
                    }
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
