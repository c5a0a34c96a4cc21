//! CLI for the h5attr attribute library.
//!
//! Provides commands for creating container files and inspecting, setting
//! and removing attributes on their groups and datasets.

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use h5attr::convert::check_charset;
use h5attr::error::AttributeError;
use h5attr::message::AttributeMessage;
use h5attr::{
    Attribute, Dataspace, Datatype, File, FileConfig, Location, OpenMode,
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

/// h5attr — inspect and edit HDF5-style attributes.
#[derive(Parser)]
#[command(name = "h5attr", version, about)]
struct Cli {
    /// JSON file with a `FileConfig`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create an empty container file.
    Init {
        /// Path of the file to create.
        file: PathBuf,
    },

    /// Create a group, including missing parents.
    Mkgroup {
        /// Path to the container file.
        file: PathBuf,

        /// Absolute group path (e.g. "/instrument/detector").
        path: String,
    },

    /// List objects and their attributes.
    Info {
        /// Path to the container file.
        file: PathBuf,
    },

    /// Print an attribute value.
    Get {
        /// Path to the container file.
        file: PathBuf,

        /// Object path ("/" for the root group).
        object: String,

        /// Attribute name.
        name: String,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Create or replace an attribute.
    Set {
        /// Path to the container file.
        file: PathBuf,

        /// Object path ("/" for the root group).
        object: String,

        /// Attribute name.
        name: String,

        /// Element type.
        #[arg(long)]
        kind: ValueKind,

        /// Comma-separated values.
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        value: Vec<String>,

        /// Two-dimensional shape as ROWSxCOLS.
        #[arg(long)]
        shape: Option<String>,
    },

    /// Delete an attribute.
    Rm {
        /// Path to the container file.
        file: PathBuf,

        /// Object path ("/" for the root group).
        object: String,

        /// Attribute name.
        name: String,
    },
}

/// Output format for attribute values.
#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// `name = value` lines.
    Text,
    /// A JSON object.
    Json,
}

/// Element type for `set`.
#[derive(Clone, Copy, ValueEnum)]
enum ValueKind {
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// Fixed-length string sized to the longest value.
    String,
    /// Variable-length string.
    Vlstring,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Init { file } => cmd_init(&file, config),
        Commands::Mkgroup { file, path } => cmd_mkgroup(&file, &path, config),
        Commands::Info { file } => cmd_info(&file, config),
        Commands::Get {
            file,
            object,
            name,
            format,
        } => cmd_get(&file, &object, &name, format, config),
        Commands::Set {
            file,
            object,
            name,
            kind,
            value,
            shape,
        } => cmd_set(&file, &object, &name, kind, &value, shape.as_deref(), config),
        Commands::Rm { file, object, name } => cmd_rm(&file, &object, &name, config),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<FileConfig, Box<dyn Error>> {
    match path {
        Some(path) => Ok(FileConfig::from_json_file(path)?),
        None => Ok(FileConfig::default()),
    }
}

/// Implements `h5attr init <file>`.
fn cmd_init(path: &Path, config: FileConfig) -> Result<(), Box<dyn Error>> {
    File::create_with_config(path, config)?.close()?;
    println!("Created {}", path.display());
    Ok(())
}

/// Implements `h5attr mkgroup <file> <path>`.
fn cmd_mkgroup(path: &Path, group_path: &str, config: FileConfig) -> Result<(), Box<dyn Error>> {
    let file = File::open_with_config(path, OpenMode::ReadWrite, config)?;
    let mut group = file.root()?;
    for component in group_path.split('/').filter(|c| !c.is_empty()) {
        group = if group.member_names().iter().any(|m| m == component) {
            group.open_group(component)?
        } else {
            group.create_group(component)?
        };
    }
    println!("{}", group.object_path());
    drop(group);
    file.close()?;
    Ok(())
}

/// Implements `h5attr info <file>`.
fn cmd_info(path: &Path, config: FileConfig) -> Result<(), Box<dyn Error>> {
    let file = File::open_with_config(path, OpenMode::ReadOnly, config)?;

    println!("File: {}", path.display());
    println!();

    for summary in file.objects() {
        let object = file.open_object(&summary.path)?;
        match &object {
            h5attr::Object::Group(_) => println!("{} (group)", summary.path),
            h5attr::Object::Dataset(ds) => println!(
                "{} (dataset: {}, {})",
                summary.path,
                ds.datatype()?,
                describe_space(&ds.space()?)
            ),
        }
        for name in object.attribute_names()? {
            let attr = object.open_attribute(&name)?;
            println!(
                "    @{name}: {}, {}",
                attr.datatype()?,
                describe_space(&attr.space()?)
            );
        }
    }
    Ok(())
}

/// Implements `h5attr get <file> <object> <name>`.
fn cmd_get(
    path: &Path,
    object: &str,
    name: &str,
    format: OutputFormat,
    config: FileConfig,
) -> Result<(), Box<dyn Error>> {
    let file = File::open_with_config(path, OpenMode::ReadOnly, config)?;
    let attr = file.open_object(object)?.open_attribute(name)?;
    let values = read_values(&attr)?;
    let space = attr.space()?;
    let (dims, _) = space.simple_extent_dims();

    match format {
        OutputFormat::Json => {
            let value = match dims.as_slice() {
                [] if values.len() == 1 => values.into_iter().next().unwrap_or(Value::Null),
                [_, cols] if *cols > 0 => Value::Array(
                    values
                        .chunks(usize::try_from(*cols)?)
                        .map(|row| Value::Array(row.to_vec()))
                        .collect(),
                ),
                _ => Value::Array(values),
            };
            let out = json!({
                "object": attr.object_path(),
                "name": attr.name(),
                "type": attr.datatype()?.to_string(),
                "shape": dims,
                "value": value,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            let text: Vec<String> = values.iter().map(render).collect();
            match dims.as_slice() {
                [_, cols] if *cols > 0 => {
                    println!("{name} =");
                    for row in text.chunks(usize::try_from(*cols)?) {
                        println!("    {}", row.join("\t"));
                    }
                }
                _ => println!("{name} = {}", text.join(", ")),
            }
        }
    }
    Ok(())
}

/// Values parsed from `--value` before the file is touched.
enum NewValue {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text,
}

impl NewValue {
    fn parse(kind: ValueKind, values: &[String]) -> Result<Self, Box<dyn Error>> {
        Ok(match kind {
            ValueKind::Int => Self::Int(
                values
                    .iter()
                    .map(|v| v.trim().parse::<i64>())
                    .collect::<Result<_, _>>()?,
            ),
            ValueKind::Float => Self::Float(
                values
                    .iter()
                    .map(|v| v.trim().parse::<f64>())
                    .collect::<Result<_, _>>()?,
            ),
            ValueKind::String | ValueKind::Vlstring => Self::Text,
        })
    }
}

/// Implements `h5attr set <file> <object> <name> --kind K --value V`.
///
/// Every check that can reject the new value runs before an existing
/// attribute is deleted, so a failed `set` leaves the file unchanged.
fn cmd_set(
    path: &Path,
    object: &str,
    name: &str,
    kind: ValueKind,
    values: &[String],
    shape: Option<&str>,
    config: FileConfig,
) -> Result<(), Box<dyn Error>> {
    let space = match shape {
        Some(shape) => {
            let (rows, cols) = parse_shape(shape)?;
            Dataspace::simple(&[rows, cols])?
        }
        None if values.len() == 1 => Dataspace::scalar(),
        None => Dataspace::simple(&[values.len() as u64])?,
    };
    if space.num_elements() != values.len() as u64 {
        return Err(format!(
            "shape {} holds {} values, got {}",
            describe_space(&space),
            space.num_elements(),
            values.len()
        )
        .into());
    }
    let new_value = NewValue::parse(kind, values)?;

    let file = File::open_with_config(path, OpenMode::ReadWrite, config)?;
    let target = file.open_object(object)?;
    let datatype = match kind {
        ValueKind::Int => Datatype::native::<i64>(),
        ValueKind::Float => Datatype::native::<f64>(),
        ValueKind::String => {
            let longest = values.iter().map(String::len).max().unwrap_or(0);
            file.config().string_type(Some(longest.max(1)))
        }
        ValueKind::Vlstring => file.config().string_type(None),
    };
    if let Some(charset) = datatype.charset() {
        for value in values {
            check_charset(value, charset)?;
        }
    }
    let size = AttributeMessage::encoded_len(name, &datatype, &space, file.config().attribute_version)?;
    if size > file.config().max_attribute_size {
        return Err(AttributeError::TooLarge {
            name: name.to_string(),
            size,
            max: file.config().max_attribute_size,
        }
        .into());
    }

    if target.attribute_exists(name)? {
        target.delete_attribute(name)?;
    }
    let attr = target.create_attribute(name, &datatype, &space)?;
    match new_value {
        NewValue::Int(parsed) => attr.write(&parsed)?,
        NewValue::Float(parsed) => attr.write(&parsed)?,
        NewValue::Text => attr.write_strings(values)?,
    }
    attr.close()?;
    drop(target);
    file.close()?;
    println!("Set {object}@{name}");
    Ok(())
}

/// Implements `h5attr rm <file> <object> <name>`.
fn cmd_rm(path: &Path, object: &str, name: &str, config: FileConfig) -> Result<(), Box<dyn Error>> {
    let file = File::open_with_config(path, OpenMode::ReadWrite, config)?;
    file.open_object(object)?.delete_attribute(name)?;
    file.close()?;
    println!("Removed {object}@{name}");
    Ok(())
}

/// Reads an attribute as JSON values according to its file type.
fn read_values(attr: &Attribute) -> Result<Vec<Value>, Box<dyn Error>> {
    let values = match attr.datatype()? {
        Datatype::Integer { signed: true, .. } => {
            attr.read::<i64>()?.into_iter().map(Value::from).collect()
        }
        Datatype::Integer { signed: false, .. } => {
            attr.read::<u64>()?.into_iter().map(Value::from).collect()
        }
        Datatype::Float { .. } => attr.read::<f64>()?.into_iter().map(Value::from).collect(),
        Datatype::FixedString { .. } | Datatype::VarLenString { .. } => {
            attr.read_strings()?.into_iter().map(Value::from).collect()
        }
    };
    Ok(values)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn describe_space(space: &Dataspace) -> String {
    match space {
        Dataspace::Scalar => "scalar".to_string(),
        Dataspace::Null => "null".to_string(),
        Dataspace::Simple { dims, .. } => {
            let dims: Vec<String> = dims.iter().map(u64::to_string).collect();
            format!("[{}]", dims.join(" x "))
        }
    }
}

/// Parses `ROWSxCOLS`.
fn parse_shape(shape: &str) -> Result<(u64, u64), Box<dyn Error>> {
    let (rows, cols) = shape
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid shape '{shape}', expected ROWSxCOLS"))?;
    Ok((rows.trim().parse()?, cols.trim().parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("2x3").unwrap(), (2, 3));
        assert_eq!(parse_shape("4X1").unwrap(), (4, 1));
        assert!(parse_shape("23").is_err());
        assert!(parse_shape("ax3").is_err());
    }

    #[test]
    fn test_describe_space() {
        assert_eq!(describe_space(&Dataspace::scalar()), "scalar");
        assert_eq!(describe_space(&Dataspace::simple(&[2, 5]).unwrap()), "[2 x 5]");
    }

    #[test]
    fn test_set_then_read_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cli.h5a");
        cmd_init(&path, FileConfig::default()).unwrap();
        cmd_mkgroup(&path, "/inst/det", FileConfig::default()).unwrap();

        let values: Vec<String> = ["a", "bb", "c", "d"].iter().map(|s| (*s).to_string()).collect();
        cmd_set(
            &path,
            "/inst/det",
            "labels",
            ValueKind::String,
            &values,
            Some("2x2"),
            FileConfig::default(),
        )
        .unwrap();
        cmd_set(
            &path,
            "/",
            "gain",
            ValueKind::Float,
            &["1.5".to_string()],
            None,
            FileConfig::default(),
        )
        .unwrap();

        let file = File::open(&path).unwrap();
        let labels = file
            .open_object("/inst/det")
            .unwrap()
            .open_attribute("labels")
            .unwrap();
        assert_eq!(
            labels.read_fixed_string_matrix().unwrap(),
            vec![vec!["a", "bb"], vec!["c", "d"]]
        );
        let gain = file.open_attribute("gain").unwrap();
        assert_eq!(read_values(&gain).unwrap(), vec![json!(1.5)]);

        cmd_rm(&path, "/", "gain", FileConfig::default()).unwrap();
        assert!(cmd_rm(&path, "/", "gain", FileConfig::default()).is_err());
    }

    #[test]
    fn test_set_replaces_existing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("replace.h5a");
        cmd_init(&path, FileConfig::default()).unwrap();
        let one = vec!["1".to_string(), "2".to_string()];
        cmd_set(&path, "/", "n", ValueKind::Int, &one, None, FileConfig::default()).unwrap();
        cmd_set(&path, "/", "n", ValueKind::Vlstring, &one, None, FileConfig::default()).unwrap();

        let file = File::open(&path).unwrap();
        let attr = file.open_attribute("n").unwrap();
        assert!(attr.datatype().unwrap().is_variable_str());
        assert_eq!(attr.read_strings().unwrap(), one);
    }

    #[test]
    fn test_rejected_set_keeps_previous_value() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("keep.h5a");
        cmd_init(&path, FileConfig::default()).unwrap();
        let answer = vec!["42".to_string()];
        cmd_set(&path, "/", "n", ValueKind::Int, &answer, None, FileConfig::default()).unwrap();

        let bad_int = vec!["abc".to_string()];
        assert!(cmd_set(&path, "/", "n", ValueKind::Int, &bad_int, None, FileConfig::default()).is_err());
        let bad_float = vec!["1.5".to_string(), "x".to_string()];
        assert!(
            cmd_set(&path, "/", "n", ValueKind::Float, &bad_float, None, FileConfig::default())
                .is_err()
        );
        let three = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        assert!(
            cmd_set(&path, "/", "n", ValueKind::Int, &three, Some("2x2"), FileConfig::default())
                .is_err()
        );
        let non_ascii = vec!["µm".to_string()];
        assert!(
            cmd_set(&path, "/", "n", ValueKind::Vlstring, &non_ascii, None, FileConfig::default())
                .is_err()
        );
        let config = FileConfig {
            max_attribute_size: 64,
            ..FileConfig::default()
        };
        let long = vec!["x".repeat(100)];
        assert!(cmd_set(&path, "/", "n", ValueKind::String, &long, None, config).is_err());

        let file = File::open(&path).unwrap();
        let attr = file.open_attribute("n").unwrap();
        assert_eq!(attr.read_scalar::<i64>().unwrap(), 42);
    }
}
