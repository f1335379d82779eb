use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use toolsaf::batch::{BatchImporter, LabelFilter};
use toolsaf::events::EventInterface;
use toolsaf::inspector::Inspector;
use toolsaf::logger::EventLogger;
use toolsaf::model::IoTSystem;
use toolsaf::serializer::{EventSerializer, ModelReader, ModelSerializer};

mod report;

/// Security statement checker: reads a statement and batches of tool
/// output, and reports how the observations match the statement.
#[derive(Parser, Debug)]
#[command(name = "toolsaf", version, about)]
struct Args {
	/// Serialized statement JSON to check against.
	#[arg(long)]
	statement: Option<PathBuf>,

	/// Directory of tool data to ingest; repeatable.
	#[arg(long = "read")]
	read: Vec<PathBuf>,

	/// Evidence label filter, e.g. "pcap,nmap,^slow".
	#[arg(long = "def-loads", default_value = "")]
	def_loads: String,

	/// Dump the statement and events as JSON to stdout.
	#[arg(long = "statement-json")]
	statement_json: bool,

	/// Append accepted events to this JSON-lines file.
	#[arg(long)]
	db: Option<PathBuf>,

	/// Do not truncate report output.
	#[arg(long = "no-truncate")]
	no_truncate: bool,

	/// Use colors in the report.
	#[arg(long)]
	color: bool,

	/// Report detail selection: properties,ignored,irrelevant.
	#[arg(short = 's', default_value = "")]
	show: String,
}

fn main() {
	if let Err(e) = run() {
		eprintln!("toolsaf: {e:#}");
		std::process::exit(1);
	}
}

fn run() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_writer(std::io::stderr)
		.init();
	let args = Args::parse();

	let system = match &args.statement {
		Some(path) => {
			let content = std::fs::read_to_string(path)
				.with_context(|| format!("reading statement {}", path.display()))?;
			let rows: Vec<serde_json::Value> = serde_json::from_str(&content)
				.with_context(|| format!("parsing statement {}", path.display()))?;
			ModelReader::read(&rows).context("reading statement model")?
		},
		None => IoTSystem::default(),
	};

	let label_filter = LabelFilter::new(&args.def_loads).context("parsing --def-loads")?;
	let inspector = Inspector::new(system);
	let mut logger = EventLogger::new(inspector);

	for dir in &args.read {
		let mut importer = BatchImporter::new(&mut logger, label_filter.clone());
		importer
			.import_batch(dir)
			.with_context(|| format!("importing {}", dir.display()))?;
	}

	if let Some(db) = &args.db {
		persist_events(&logger, db).with_context(|| format!("writing {}", db.display()))?;
	}

	if args.statement_json {
		dump_statement_json(&logger)?;
		return Ok(());
	}

	let options = report::ReportOptions {
		color: args.color,
		truncate: !args.no_truncate,
		show_properties: args.show.contains("properties"),
		show_ignored: args.show.contains("ignored"),
		show_irrelevant: args.show.contains("irrelevant"),
	};
	let stdout = std::io::stdout();
	report::print_report(&mut stdout.lock(), &logger, &options)?;
	Ok(())
}

/// Append every logged event to the database file as JSON lines.
fn persist_events(logger: &EventLogger, db: &PathBuf) -> anyhow::Result<()> {
	let mut file = std::fs::OpenOptions::new()
		.create(true)
		.append(true)
		.open(db)?;
	let system = logger.inspector().system();
	let mut serializer = EventSerializer::new(system);
	for log in logger.logs() {
		for row in serializer.write_event(&log.event) {
			writeln!(file, "{row}")?;
		}
	}
	Ok(())
}

/// Dump the model and all events to stdout.
fn dump_statement_json(logger: &EventLogger) -> anyhow::Result<()> {
	let system = logger.inspector().system();
	let mut rows = ModelSerializer::new(system).write();
	let mut events = EventSerializer::new(system);
	for log in logger.logs() {
		rows.extend(events.write_event(&log.event));
	}
	let stdout = std::io::stdout();
	let mut out = stdout.lock();
	for row in rows {
		writeln!(out, "{row}")?;
	}
	Ok(())
}
