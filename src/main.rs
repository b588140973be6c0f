use coldeval::host::{exception_message, Host};
use coldeval::jvm::{read_class_file, JVMParser};
use coldeval::program::Program;
use coldeval::{Completion, RuntimeConfig, Type, TypeSort, Value};

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coldeval")]
#[command(about = "Run a static method of a Java class file", long_about = None)]
struct Cli {
    /// Path to the `.class` file
    class_file: PathBuf,

    /// Name of the static method to run
    method: String,

    /// Arguments, parsed according to the method descriptor
    #[arg(allow_hyphen_values = true)]
    args: Vec<String>,

    /// Method descriptor, e.g. `(I)I`, required for overloaded methods
    #[arg(short, long)]
    descriptor: Option<String>,

    /// Abort after executing this many instructions in a single frame
    #[arg(long)]
    max_steps: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_argument(t: &Type, raw: &str) -> anyhow::Result<Value> {
    let value = match t.sort() {
        TypeSort::Boolean => Value::boolean(raw.parse::<bool>()?),
        TypeSort::Char => match raw.chars().next() {
            Some(c) if raw.chars().count() == 1 => match u16::try_from(u32::from(c)) {
                Ok(unit) => Value::char(unit),
                Err(_) => bail!("`{raw}` does not fit in a single UTF-16 unit"),
            },
            _ => bail!("expected a single character, got `{raw}`"),
        },
        TypeSort::Byte => Value::byte(raw.parse()?),
        TypeSort::Short => Value::short(raw.parse()?),
        TypeSort::Int => Value::Int(raw.parse()?),
        TypeSort::Long => Value::Long(raw.parse()?),
        TypeSort::Float => Value::Float(raw.parse()?),
        TypeSort::Double => Value::Double(raw.parse()?),
        _ if t.descriptor() == "Ljava/lang/String;" => Value::string(raw),
        _ => bail!("cannot pass `{raw}` as {t}"),
    };
    Ok(value)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let bytes = read_class_file(&cli.class_file)
        .with_context(|| format!("reading {}", cli.class_file.display()))?;
    let class_file = JVMParser::parse(&bytes)?;
    let program = Program::new(&class_file)?;

    let method = program.find_method(&cli.method, cli.descriptor.as_deref())?;
    if !method.is_static() {
        bail!("`{}` is not a static method", cli.method);
    }
    let parameters = method.descriptor().argument_types();
    if parameters.len() != cli.args.len() {
        bail!(
            "`{}{}` takes {} arguments, {} given",
            cli.method,
            method.descriptor(),
            parameters.len(),
            cli.args.len()
        );
    }
    let arguments = parameters
        .iter()
        .zip(&cli.args)
        .map(|(t, raw)| parse_argument(t, raw))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let descriptor = method.descriptor().descriptor().to_string();

    let mut config = RuntimeConfig::new();
    config.max_steps = cli.max_steps;
    let mut host = Host::new(program, config);
    match host.invoke(&cli.method, Some(&descriptor), arguments)? {
        Completion::Returned(Some(value)) => println!("{value}"),
        Completion::Returned(None) => {}
        Completion::Threw(exception) => {
            let class = exception
                .as_object()?
                .and_then(|object| host.class_of(object))
                .map_or_else(|| "exception".to_string(), |t| t.internal_name().replace('/', "."));
            match exception_message(&exception) {
                Some(message) => bail!("uncaught {class}: {message}"),
                None => bail!("uncaught {class}"),
            }
        }
    }
    Ok(())
}
