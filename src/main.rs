//! Command-line interface for xmltab

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};

#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
use xmltab::config::Configuration;
#[cfg(feature = "cli")]
use xmltab::dataset::{Dataset, DatasetSource};
#[cfg(feature = "cli")]
use xmltab::diagnostics::CollectingSink;
#[cfg(feature = "cli")]
use xmltab::locations::SchemaLocation;
#[cfg(feature = "cli")]
use xmltab::value::Value;

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "xmltab")]
#[command(author, version, about = "Schema-driven XML to relational mapping tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand, Debug)]
enum Commands {
    /// List the tables derived from a document's schema
    Layers {
        /// Path to the XML instance document
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Explicit schema to use instead of the document's schemaLocation
        #[arg(short, long, value_name = "XSD")]
        xsd: Option<PathBuf>,

        /// Also list the metadata tables
        #[arg(long)]
        metadata: bool,
    },

    /// Dump the features of one table (or of every table)
    Dump {
        /// Path to the XML instance document
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Explicit schema to use instead of the document's schemaLocation
        #[arg(short, long, value_name = "XSD")]
        xsd: Option<PathBuf>,

        /// Table to dump (all tables when omitted)
        #[arg(short, long)]
        layer: Option<String>,

        /// Validate the document while reading
        #[arg(long)]
        validate: bool,
    },
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Layers {
            file,
            xsd,
            metadata,
        } => cmd_layers(file, xsd, metadata),
        Commands::Dump {
            file,
            xsd,
            layer,
            validate,
        } => cmd_dump(file, xsd, layer, validate),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(feature = "cli")]
fn build_source(file: Option<PathBuf>, xsd: Option<PathBuf>) -> DatasetSource {
    let mut source = match file {
        Some(path) => DatasetSource::from_instance_path(path),
        None => DatasetSource::default(),
    };
    if let Some(xsd) = xsd {
        source = source.with_schema(SchemaLocation::Path(xsd));
    }
    source
}

#[cfg(feature = "cli")]
fn cmd_layers(
    file: Option<PathBuf>,
    xsd: Option<PathBuf>,
    metadata: bool,
) -> xmltab::Result<()> {
    let mut config = Configuration::default();
    config.expose_metadata_layers = metadata;
    let sink = CollectingSink::shared();
    let dataset = Dataset::open(build_source(file, xsd), config, sink)?;

    for layer in dataset.layers() {
        match layer.class {
            Some(id) => {
                let class = dataset.model().class(id);
                println!(
                    "{} ({}, {} fields) [{}]",
                    layer.name,
                    class.category.name(),
                    class.columns().count(),
                    class.xpath
                );
            }
            None => println!("{} (metadata)", layer.name),
        }
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn cmd_dump(
    file: PathBuf,
    xsd: Option<PathBuf>,
    layer: Option<String>,
    validate: bool,
) -> xmltab::Result<()> {
    let mut config = Configuration::default();
    config.validate = validate;
    let sink = CollectingSink::shared();
    let dataset = Dataset::open(build_source(Some(file), xsd), config, sink.clone())?;

    let layers: Vec<String> = match layer {
        Some(name) => vec![name],
        None => dataset.layers().into_iter().map(|l| l.name).collect(),
    };

    for name in layers {
        println!("# {}", name);
        for feature in dataset.layer_features(&name)? {
            print!("{}:", feature.pkid);
            for (field, value) in feature.values() {
                match value {
                    Value::Geometry(g) => print!(" {}={}", field, g.to_wkt()),
                    other => print!(" {}={:?}", field, other),
                }
            }
            println!();
        }
    }

    for diagnostic in sink.borrow().diagnostics() {
        eprintln!("warning: {}", diagnostic);
    }
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Rebuild with --features cli");
}
