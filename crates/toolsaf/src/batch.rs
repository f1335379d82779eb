//! Batch import of tool output directories. Each directory carries a
//! `00meta.json` describing the file type, label and per-source overlays;
//! files are dispatched to the adapter for their file type.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use toolsaf_core::strng;
use toolsaf_core::Strng;

use crate::errors::{AdapterError, ConfigurationError};
use crate::events::{Evidence, EventInterface, EvidenceSource};
use crate::serializer::EventReader;
use crate::types::{Address, ExternalActivity};

/// Filter of evidence labels, parsed from `a,b,^c` syntax. A leading `^`
/// switches to exclude-list mode.
#[derive(Debug, Clone, Default)]
pub struct LabelFilter {
	explicit_include: bool,
	included: IndexSet<Strng>,
	excluded: IndexSet<Strng>,
}

impl LabelFilter {
	pub fn new(label_specification: &str) -> Result<LabelFilter, ConfigurationError> {
		let mut filter = LabelFilter::default();
		let spec = label_specification.trim();
		if spec.is_empty() {
			return Ok(filter); // all included
		}
		filter.explicit_include = true;
		for (index, d) in spec.split(',').enumerate() {
			if let Some(label) = d.strip_prefix('^') {
				if index == 0 {
					filter.explicit_include = false;
				}
				filter.excluded.insert(strng::new(label));
			} else {
				filter.included.insert(strng::new(d));
			}
		}
		let both: Vec<&Strng> = filter.included.intersection(&filter.excluded).collect();
		if !both.is_empty() {
			return Err(ConfigurationError::Invalid(format!(
				"labels both included and excluded: {both:?}"
			)));
		}
		Ok(filter)
	}

	pub fn filter(&self, label: &str) -> bool {
		if self.explicit_include {
			self.included.contains(label)
		} else {
			!self.excluded.contains(label)
		}
	}
}

/// `00meta.json` contents. Unknown fields are tolerated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MetaFile {
	label: Option<String>,
	file_type: String,
	name: Option<String>,
	description: String,
	location: String,
	from_pipe: bool,
	load_baseline: bool,
	include: Option<bool>,
	file_order: Vec<String>,
	addresses: IndexMap<String, String>,
	external_activity: IndexMap<String, String>,
}

/// Effective metadata of one batch directory.
#[derive(Debug, Clone)]
pub struct FileMetaInfo {
	pub label: Strng,
	pub name: Strng,
	pub file_type: Strng,
	pub description: Strng,
	pub location: Strng,
	pub file_load_order: Vec<Strng>,
	pub from_pipe: bool,
	pub load_baseline: bool,
	pub default_include: bool,
	/// Source template carrying the per-batch overlays.
	source: EvidenceSource,
}

impl FileMetaInfo {
	fn empty() -> FileMetaInfo {
		FileMetaInfo {
			label: strng::EMPTY,
			name: strng::EMPTY,
			file_type: strng::EMPTY,
			description: strng::EMPTY,
			location: strng::EMPTY,
			file_load_order: Vec::new(),
			from_pipe: false,
			load_baseline: false,
			default_include: true,
			source: EvidenceSource::new(""),
		}
	}

	/// Sort files to the specified order; unlisted files keep their order
	/// after the listed ones.
	fn sort_load_order(files: Vec<PathBuf>, load_order: &[Strng]) -> Vec<PathBuf> {
		let mut remaining: IndexMap<String, PathBuf> = files
			.into_iter()
			.map(|f| {
				(
					f.file_name()
						.map(|n| n.to_string_lossy().to_string())
						.unwrap_or_default(),
					f,
				)
			})
			.collect();
		let mut sorted = Vec::new();
		for fn_name in load_order {
			if let Some(f) = remaining.shift_remove(fn_name.as_str()) {
				sorted.push(f);
			}
		}
		sorted.extend(remaining.into_values());
		sorted
	}
}

/// Imports batches of tool data files from a directory tree.
pub struct BatchImporter<'a, I: EventInterface> {
	interface: &'a mut I,
	label_filter: LabelFilter,
	/// Load baseline claims instead of checking them.
	pub load_baseline: bool,
	meta_file_count: usize,
	/// Evidence sources by label, including filtered-out ones.
	pub evidence: IndexMap<Strng, Vec<Arc<EvidenceSource>>>,
}

impl<'a, I: EventInterface> BatchImporter<'a, I> {
	pub fn new(interface: &'a mut I, label_filter: LabelFilter) -> BatchImporter<'a, I> {
		BatchImporter {
			interface,
			label_filter,
			load_baseline: false,
			meta_file_count: 0,
			evidence: IndexMap::new(),
		}
	}

	/// Import a batch of files from a directory, recursively.
	pub fn import_batch(&mut self, file: &Path) -> Result<(), AdapterError> {
		if !file.is_dir() {
			return Err(AdapterError::Content(
				file.display().to_string(),
				"expected a directory".to_string(),
			));
		}
		let root = FileMetaInfo::empty();
		self.import_directory(file, &root)?;
		if self.meta_file_count == 0 {
			warn!("no 00meta.json files found");
		}
		Ok(())
	}

	fn import_directory(
		&mut self,
		dir: &Path,
		parent: &FileMetaInfo,
	) -> Result<(), AdapterError> {
		info!(directory = %dir.display(), "scanning");
		let meta_file = dir.join("00meta.json");
		let info = if meta_file.is_file() {
			self.meta_file_count += 1;
			let info = self.parse_meta(&meta_file, dir, parent)?;
			self.evidence.entry(info.label.clone()).or_default();
			info
		} else {
			let mut info = FileMetaInfo::empty();
			info.source = parent.source.rename(None, None, None);
			info
		};

		// files first, then directories, stable by name
		let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
			.map_err(|e| AdapterError::Io(dir.display().to_string(), e))?
			.filter_map(|e| e.ok())
			.map(|e| e.path())
			.collect();
		entries.sort_by_key(|p| (p.is_dir(), p.file_name().map(|n| n.to_os_string())));

		let mut proc_list = Vec::new();
		for path in entries {
			if path == meta_file {
				continue;
			}
			let name = path
				.file_name()
				.map(|n| n.to_string_lossy().to_string())
				.unwrap_or_default();
			if name.starts_with('.') || name.starts_with('_') || name.ends_with('~') {
				continue;
			}
			proc_list.push(path);
		}
		if !info.file_load_order.is_empty() {
			proc_list = FileMetaInfo::sort_load_order(proc_list, &info.file_load_order);
		}

		let skip_processing = !self.label_filter.filter(&info.label);
		if info.label.is_empty() {
			debug!("skipping all files as no 00meta.json");
		}

		for path in proc_list {
			if path.is_dir() {
				self.import_directory(&path, &info)?;
				continue;
			}
			if info.label.is_empty() {
				continue;
			}
			if !info.default_include && !self.label_filter.included.contains(&info.label) {
				debug!(file = %path.display(), "skipping, not explicitly included");
				continue;
			}
			if let Err(e) = self.process_file(&path, &info, skip_processing) {
				// a failing file is skipped, the batch continues
				warn!(file = %path.display(), error = %e, "skipping failed file");
			}
		}
		Ok(())
	}

	fn parse_meta(
		&mut self,
		meta_file: &Path,
		dir: &Path,
		parent: &FileMetaInfo,
	) -> Result<FileMetaInfo, AdapterError> {
		let dir_name = dir
			.file_name()
			.map(|n| n.to_string_lossy().to_string())
			.unwrap_or_default();
		let content = std::fs::read_to_string(meta_file)
			.map_err(|e| AdapterError::Io(meta_file.display().to_string(), e))?;
		let meta: MetaFile = if content.trim().is_empty() {
			MetaFile::default()
		} else {
			serde_json::from_str(&content).map_err(|e| {
				AdapterError::Content(meta_file.display().to_string(), e.to_string())
			})?
		};
		let label = meta.label.clone().unwrap_or_else(|| dir_name.clone());
		let mut info = FileMetaInfo {
			label: strng::new(&label),
			name: strng::new(meta.name.as_deref().unwrap_or(&label)),
			file_type: strng::new(&meta.file_type),
			description: strng::new(&meta.description),
			location: strng::new(&meta.location),
			file_load_order: meta.file_order.iter().map(strng::new).collect(),
			from_pipe: meta.from_pipe,
			load_baseline: meta.load_baseline,
			default_include: meta.include.unwrap_or(true),
			source: EvidenceSource::new(&meta.file_type),
		};
		// inherit parent overlays
		info.source.address_map = parent.source.address_map.clone();
		info.source.activity_map = parent.source.activity_map.clone();

		// batch-specific addresses
		let system = self.interface.system();
		for (add, ent_s) in &meta.addresses {
			let address = Address::parse(add)?;
			let ent = Address::parse(ent_s)?;
			let Some(entity) = system.find_endpoint(&ent, None) else {
				return Err(AdapterError::Content(
					meta_file.display().to_string(),
					format!("unknown entity {ent_s}"),
				));
			};
			info.source.address_map.insert(address, entity);
		}
		// batch-specific external activity policies
		for (ent_s, policy_n) in &meta.external_activity {
			let ent = Address::parse(ent_s)?;
			let Some(node) = system.find_endpoint(&ent, None) else {
				return Err(AdapterError::Content(
					meta_file.display().to_string(),
					format!("unknown entity '{ent_s}'"),
				));
			};
			let policy = ExternalActivity::parse(policy_n)?;
			info.source.activity_map.insert(node, policy);
		}
		Ok(info)
	}

	fn process_file(
		&mut self,
		path: &Path,
		info: &FileMetaInfo,
		skip_processing: bool,
	) -> Result<(), AdapterError> {
		let Some(adapter) = Adapter::by_file_type(&info.file_type) else {
			info!(
				file = %path.display(),
				file_type = %info.file_type,
				"skipping unsupported file type"
			);
			return Ok(());
		};
		let mut source = info.source.rename(
			Some(adapter.tool_name()),
			Some(&path.display().to_string()),
			Some(&info.label),
		);
		source.timestamp = file_timestamp(path);
		let source = Arc::new(source);
		self.evidence
			.entry(info.label.clone())
			.or_default()
			.push(source.clone());
		if skip_processing {
			info!(file = %path.display(), label = %info.label, "skipping by label");
			return Ok(());
		}
		info!(file = %path.display(), label = %info.label, "processing");
		let content = std::fs::read_to_string(path)
			.map_err(|e| AdapterError::Io(path.display().to_string(), e))?;
		adapter.process(&content, self.interface, &source, path)
	}
}

fn file_timestamp(path: &Path) -> Option<DateTime<Utc>> {
	let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
	Some(DateTime::<Utc>::from(modified))
}

/// The built-in adapters by file type. Tool-specific parsers plug in
/// here; the serialized-events adapter covers pre-normalized captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
	/// Events in the serialized JSON form, one row per line or an array.
	CaptureJson,
}

impl Adapter {
	pub fn by_file_type(file_type: &str) -> Option<Adapter> {
		match file_type {
			"capture-json" | "events-json" => Some(Adapter::CaptureJson),
			_ => None,
		}
	}

	pub fn tool_name(&self) -> &'static str {
		match self {
			Adapter::CaptureJson => "Event capture",
		}
	}

	fn process<I: EventInterface>(
		&self,
		content: &str,
		interface: &mut I,
		source: &Arc<EvidenceSource>,
		path: &Path,
	) -> Result<(), AdapterError> {
		match self {
			Adapter::CaptureJson => {
				let rows = parse_rows(content, path)?;
				let mut events = Vec::new();
				{
					let mut reader = EventReader::new(interface.system());
					for row in &rows {
						if let Some(mut event) = reader
							.read_row(row)
							.map_err(AdapterError::Parse)?
						{
							// evidence comes from this batch file
							let tail = event.evidence().tail_ref.clone();
							*event.evidence_mut() = Evidence::with_ref(source.clone(), &tail);
							events.push(event);
						}
					}
				}
				for event in events {
					interface.consume(event);
				}
				Ok(())
			},
		}
	}
}

fn parse_rows(content: &str, path: &Path) -> Result<Vec<Value>, AdapterError> {
	let trimmed = content.trim_start();
	if trimmed.starts_with('[') {
		let rows: Vec<Value> = serde_json::from_str(content)
			.map_err(|e| AdapterError::Content(path.display().to_string(), e.to_string()))?;
		return Ok(rows);
	}
	// JSON lines
	let mut rows = Vec::new();
	for line in content.lines() {
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		rows.push(
			serde_json::from_str(line)
				.map_err(|e| AdapterError::Content(path.display().to_string(), e.to_string()))?,
		);
	}
	Ok(rows)
}
