//! Plain-text report of the checked system.

use std::collections::HashMap;
use std::io::Write;

use toolsaf::events::EventInterface;
use toolsaf::logger::EventLogger;
use toolsaf::model::EntityRef;
use toolsaf::property::PropertyValue;
use toolsaf::types::{Status, Verdict};

const MAX_LINE: usize = 120;

pub struct ReportOptions {
	pub color: bool,
	pub truncate: bool,
	pub show_properties: bool,
	pub show_ignored: bool,
	pub show_irrelevant: bool,
}

impl ReportOptions {
	fn verdict_str(&self, verdict: Verdict) -> String {
		if !self.color {
			return verdict.to_string();
		}
		let code = match verdict {
			Verdict::Pass => "32",
			Verdict::Fail => "31",
			Verdict::Incon => "33",
			Verdict::Ignore => "90",
		};
		format!("\x1b[{code}m{verdict}\x1b[0m")
	}

	fn line(&self, s: String) -> String {
		if self.truncate && s.chars().count() > MAX_LINE {
			let cut: String = s.chars().take(MAX_LINE - 3).collect();
			format!("{cut}...")
		} else {
			s
		}
	}
}

pub fn print_report(
	out: &mut dyn Write,
	logger: &EventLogger,
	options: &ReportOptions,
) -> anyhow::Result<()> {
	let system = logger.inspector().system();
	let mut cache = HashMap::new();

	writeln!(out, "{}", system.name())?;
	for host in system.hosts() {
		let entity = EntityRef::Node(host);
		let node = system.node(host);
		if !options.show_irrelevant && !node.is_relevant() {
			continue;
		}
		let verdict = system.get_verdict(entity, &mut cache);
		writeln!(
			out,
			"{}",
			options.line(format!(
				"{:<40} {:<12} {}",
				node.name,
				node.status.to_string(),
				options.verdict_str(verdict)
			))
		)?;
		print_properties(out, logger, entity, options)?;
		for service in &node.children {
			let s_entity = EntityRef::Node(*service);
			let s_node = system.node(*service);
			if !options.show_irrelevant && !s_node.is_relevant() {
				continue;
			}
			let verdict = system.get_verdict(s_entity, &mut cache);
			writeln!(
				out,
				"{}",
				options.line(format!(
					"  {:<38} {:<12} {}",
					s_node.name,
					s_node.status.to_string(),
					options.verdict_str(verdict)
				))
			)?;
			print_properties(out, logger, s_entity, options)?;
		}
	}
	writeln!(out, "connections:")?;
	for c in system.get_connections() {
		let entity = EntityRef::Connection(c);
		if !options.show_irrelevant && system.status(entity) == Status::External {
			continue;
		}
		let verdict = system.get_verdict(entity, &mut cache);
		writeln!(
			out,
			"{}",
			options.line(format!(
				"{:<40} {:<12} {}",
				system.long_name(entity),
				system.status(entity).to_string(),
				options.verdict_str(verdict)
			))
		)?;
		print_properties(out, logger, entity, options)?;
	}
	// contributing evidence
	let mut seen = std::collections::HashSet::new();
	writeln!(out, "evidence:")?;
	for log in logger.logs() {
		let source = &log.event.evidence().source;
		if seen.insert(source.id) {
			writeln!(
				out,
				"{}",
				options.line(format!("  {} ({})", source.name, source.base_ref))
			)?;
		}
	}
	Ok(())
}

fn print_properties(
	out: &mut dyn Write,
	logger: &EventLogger,
	entity: EntityRef,
	options: &ReportOptions,
) -> anyhow::Result<()> {
	if !options.show_properties {
		return Ok(());
	}
	let system = logger.inspector().system();
	for (key, value) in system.properties(entity) {
		let verdict = value.get_verdict();
		if verdict == Some(Verdict::Ignore) && !options.show_ignored {
			continue;
		}
		let value_str = match value {
			PropertyValue::Verdict(v) => format!(
				"{}{}",
				options.verdict_str(v.verdict),
				if v.explanation.is_empty() {
					String::new()
				} else {
					format!(" # {}", v.explanation)
				}
			),
			PropertyValue::Set(s) => format!("{} sub-checks", s.sub_keys.len()),
			PropertyValue::Release(r) => format!("release info for {}", r.sw_name),
		};
		writeln!(out, "{}", options.line(format!("    {key}: {value_str}")))?;
	}
	Ok(())
}
