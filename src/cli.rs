//! Command-line host: drives a form session from files.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use schema_forms::fields::FieldKind;
use schema_forms::presets::{BuiltinPresets, FilePresets, PresetLoader, PresetState, SpecificationField};
use schema_forms::records::{BrowseView, MemoryRecordStore};
use schema_forms::session::{PreviewBody, NO_DATA};
use schema_forms::{ArrayOp, Data, FieldNode, FieldRegistry, FormSession, Mode, Path};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// render, validate and edit JSON-Schema driven forms
#[derive(Parser, Debug)]
#[command(name = "schema-forms", version, about)]
pub struct CommandLineInterface {
    /// more logging (-v info, -vv debug, -vvv trace); RUST_LOG wins when set
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// print the field tree for a schema, UI schema and data
    Fields(FieldsOut),
    /// validate data against a schema
    Validate(FormInputs),
    /// set the value at a path
    Edit(EditOut),
    /// insert, remove or move an array element
    Array(ArrayOut),
    /// switch a oneOf/anyOf value to another branch
    Variant(VariantOut),
    /// list presets, or apply one to a specification field
    Preset(PresetOut),
    /// page through a table of records
    Browse(BrowseOut),
}

#[derive(Args, Debug, Clone)]
struct FormInputs {
    /// JSON schema file
    #[arg(long, short)]
    schema: PathBuf,

    /// UI schema file
    #[arg(long, short)]
    ui: Option<PathBuf>,

    /// form data file (empty data when omitted)
    #[arg(long, short)]
    data: Option<PathBuf>,

    /// presets file for specification fields (builtin presets when omitted)
    #[arg(long)]
    presets: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct Output {
    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Create,
    Update,
    View,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OpArg {
    Insert,
    Remove,
    MoveUp,
    MoveDown,
}

#[derive(clap::Parser, Debug)]
struct FieldsOut {
    #[command(flatten)]
    inputs: FormInputs,

    #[arg(long, value_enum, default_value = "update")]
    mode: ModeArg,

    /// print the tree as JSON
    #[arg(long)]
    json: bool,
}

#[derive(clap::Parser, Debug)]
struct EditOut {
    #[command(flatten)]
    inputs: FormInputs,

    /// dotted data path (e.g. specification.requests.cpu)
    #[arg(long, short)]
    path: String,

    /// new value as JSON; anything that is not JSON is taken as a string
    #[arg(long)]
    value: String,

    #[command(flatten)]
    output: Output,
}

#[derive(clap::Parser, Debug)]
struct ArrayOut {
    #[command(flatten)]
    inputs: FormInputs,

    #[arg(long, short)]
    path: String,

    #[arg(long, value_enum)]
    op: OpArg,

    #[arg(long)]
    index: usize,

    #[command(flatten)]
    output: Output,
}

#[derive(clap::Parser, Debug)]
struct VariantOut {
    #[command(flatten)]
    inputs: FormInputs,

    #[arg(long, short, default_value = "")]
    path: String,

    #[arg(long)]
    branch: usize,

    #[command(flatten)]
    output: Output,
}

#[derive(clap::Parser, Debug)]
struct PresetOut {
    #[command(flatten)]
    inputs: FormInputs,

    #[arg(long, short, default_value = "specification")]
    path: String,

    /// preset key or `custom`; lists presets when omitted
    #[arg(long)]
    key: Option<String>,

    #[command(flatten)]
    output: Output,
}

#[derive(clap::Parser, Debug)]
struct BrowseOut {
    /// JSON file of `{ "<table>": [rows...] }`
    #[arg(long)]
    records: PathBuf,

    #[arg(long)]
    table: String,

    #[arg(long, default_value_t = 10)]
    page_size: usize,

    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    page: usize,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Create => Mode::Create,
            ModeArg::Update => Mode::Update,
            ModeArg::View => Mode::View,
        }
    }
}

impl From<OpArg> for ArrayOp {
    fn from(op: OpArg) -> Self {
        match op {
            OpArg::Insert => ArrayOp::Insert,
            OpArg::Remove => ArrayOp::Remove,
            OpArg::MoveUp => ArrayOp::MoveUp,
            OpArg::MoveDown => ArrayOp::MoveDown,
        }
    }
}

impl FormInputs {
    fn load(&self) -> anyhow::Result<(FormSession, PresetState)> {
        let schema = read(&self.schema)?;
        let ui = self.ui.as_ref().map(read).transpose()?.unwrap_or_default();
        let data = self.data.as_ref().map(read).transpose()?.unwrap_or_default();

        let mut loader = PresetLoader::new();
        let presets = match &self.presets {
            Some(path) => loader.load(&FilePresets::new(path)),
            None => loader.load(&BuiltinPresets),
        };
        let registry = FieldRegistry::new().with(Arc::new(SpecificationField::new(loader.shared())));
        let session = FormSession::new(schema, ui, data).with_registry(registry);
        Ok((session, presets))
    }
}

impl Output {
    fn write(&self, text: &str) -> anyhow::Result<()> {
        match self.out.as_ref() {
            Some(out) => {
                if let Some(parent) = out.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                std::fs::write(out, text).with_context(|| format!("writing {}", out.display()))
            }
            None => {
                println!("{text}");
                Ok(())
            }
        }
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(match self.verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            })
        });
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    /// Returns `false` when the command ran but found problems (invalid data).
    pub fn run(&self) -> anyhow::Result<bool> {
        match &self.cmd {
            Command::Fields(target) => {
                let (session, _) = target.inputs.load()?;
                let preview = session.preview(target.mode.into());
                report_diagnostics(&preview.diagnostics);
                match preview.body {
                    PreviewBody::Form(root) if target.json => {
                        println!("{}", serde_json::to_string_pretty(&root)?);
                    }
                    PreviewBody::Form(root) => print_field(&root, 0),
                    PreviewBody::Json(text) => println!("{text}"),
                    PreviewBody::Blocked(reason) => {
                        println!("{}", reason.dimmed());
                        return Ok(false);
                    }
                }
                Ok(preview.diagnostics.is_empty())
            }
            Command::Validate(inputs) => {
                let (session, _) = inputs.load()?;
                let schema = session.schema().context("schema")?;
                let data = session.data().context("data")?;
                let errors = schema_forms::validate(&schema, &data);
                for error in &errors {
                    println!(
                        "{} {} {}",
                        format!("[{}]", error.keyword).yellow(),
                        display_path(&error.path).bold(),
                        error.message
                    );
                }
                if errors.is_empty() {
                    println!("{}", "valid".green().bold());
                } else {
                    println!("{}", format!("{} error(s)", errors.len()).red().bold());
                }
                Ok(errors.is_empty())
            }
            Command::Edit(target) => {
                let (mut session, _) = target.inputs.load()?;
                let value = Data::parse(&target.value).unwrap_or_else(|_| Data::string(&target.value));
                session.edit(&parse_path(&target.path), value)?;
                target.output.write(session.data_text())?;
                Ok(true)
            }
            Command::Array(target) => {
                let (mut session, _) = target.inputs.load()?;
                let (_, remap) = session.array_op(&parse_path(&target.path), target.op.into(), target.index)?;
                tracing::info!(?remap, "array indices remapped");
                target.output.write(session.data_text())?;
                Ok(true)
            }
            Command::Variant(target) => {
                let (mut session, _) = target.inputs.load()?;
                session.switch_variant(&parse_path(&target.path), target.branch)?;
                target.output.write(session.data_text())?;
                Ok(true)
            }
            Command::Preset(target) => {
                let (mut session, state) = target.inputs.load()?;
                let presets = match &state {
                    PresetState::Ready(presets) => presets.clone(),
                    PresetState::Failed(error) => {
                        eprintln!("{} {error}", "presets unavailable:".yellow());
                        Default::default()
                    }
                    PresetState::Loading => Default::default(),
                };
                let Some(key) = &target.key else {
                    for (key, preset) in &presets {
                        println!(
                            "{:<20} {:<20} requests {}/{}  limits {}/{}",
                            key.bold(),
                            preset.kind,
                            preset.requests.cpu,
                            preset.requests.memory,
                            preset.limits.cpu,
                            preset.limits.memory
                        );
                    }
                    println!("{:<20} {}", "custom".bold(), "keep values, enter freely".dimmed());
                    return Ok(true);
                };
                session.select_preset(&parse_path(&target.path), key, &presets)?;
                target.output.write(session.data_text())?;
                Ok(true)
            }
            Command::Browse(target) => {
                let store = MemoryRecordStore::from_file(&target.records)?;
                let mut view = BrowseView::new(&target.table, target.page_size);
                view.offset = target.page.saturating_sub(1) * view.page_size;
                view.refresh(&store);
                for error in &view.errors {
                    println!("{}", error.red());
                }
                let Some(page) = &view.page else { return Ok(false) };
                if page.rows.is_empty() {
                    println!("{}", NO_DATA.dimmed());
                }
                for row in &page.rows {
                    println!("{}", serde_json::to_string(row)?);
                }
                let (current, pages) = view.position();
                println!(
                    "{}",
                    format!("page {current}/{pages} ({} rows)", page.total_count).dimmed()
                );
                Ok(view.errors.is_empty())
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn read(path: &PathBuf) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn parse_path(text: &str) -> Path {
    let Ok(path) = text.parse::<Path>();
    path
}

fn display_path(path: &Path) -> String {
    if path.is_root() { "(root)".to_string() } else { path.to_string() }
}

fn report_diagnostics(diagnostics: &[String]) {
    for line in diagnostics {
        eprintln!("{}", line.red());
    }
}

fn print_field(field: &FieldNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let kind = match &field.kind {
        FieldKind::Custom(token) => format!("custom {token}"),
        FieldKind::Widget(name) => format!("widget {name}"),
        other => format!("{other:?}").to_lowercase(),
    };
    let mut line = format!("{indent}{} {}", field.label.bold(), format!("<{kind}>").cyan());
    if field.required {
        line.push_str(&" *".red().to_string());
    }
    if field.disabled {
        line.push_str(&" disabled".dimmed().to_string());
    }
    if field.readonly {
        line.push_str(&" readonly".dimmed().to_string());
    }
    if field.children.is_empty() {
        if let Some(value) = &field.value {
            line.push_str(&format!(" = {}", serde_json::to_string(value).unwrap_or_default()));
        }
    }
    if !field.choices.is_empty() {
        let labels: Vec<String> = field
            .choices
            .iter()
            .enumerate()
            .map(|(i, c)| if field.selected == Some(i) { format!("[{}]", c.label) } else { c.label.clone() })
            .collect();
        line.push_str(&format!(" {{{}}}", labels.join(", ")));
    }
    println!("{line}");
    for error in &field.errors {
        println!("{indent}  {} {}", "!".red().bold(), error.message.red());
    }
    for child in &field.children {
        print_field(child, depth + 1);
    }
}
