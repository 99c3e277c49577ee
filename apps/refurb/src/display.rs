//! Output rendering and formatting

use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use console::Style;
use refurb_events::{format_bytes, format_duration};
use refurb_ops::{OperationResult, RunReport, TableReport};
use refurb_plan::PartitionPlan;
use refurb_types::{FsKind, TaskSnapshot, MIB};
use std::io;
use std::time::Duration;

/// Output renderer for CLI results
#[derive(Clone)]
pub struct OutputRenderer {
    /// Use JSON output format
    json_output: bool,
    colors: bool,
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

impl OutputRenderer {
    /// Create new output renderer
    pub fn new(json_output: bool, colors: bool) -> Self {
        console::set_colors_enabled(colors);
        Self {
            json_output,
            colors,
        }
    }

    /// Render operation result
    pub fn render_result(&self, result: &OperationResult) -> io::Result<()> {
        if self.json_output {
            self.render_json(result)
        } else {
            self.render_table(result)
        }
    }

    /// One compact line, so the result ends the JSON-lines event stream
    fn render_json(&self, result: &OperationResult) -> io::Result<()> {
        let json = serde_json::to_string(result).map_err(io::Error::other)?;
        println!("{json}");
        Ok(())
    }

    fn render_table(&self, result: &OperationResult) -> io::Result<()> {
        match result {
            OperationResult::Plan(plan) => self.render_plan(plan),
            OperationResult::DiskTable(report) => self.render_disk_table(report),
            OperationResult::Run(report) => self.render_run_report(report),
            OperationResult::Success(message) => {
                println!("{}", Style::new().green().apply_to(message));
                Ok(())
            }
        }
    }

    fn render_plan(&self, plan: &PartitionPlan) -> io::Result<()> {
        println!(
            "{} layout for {} ({} MiB)",
            Style::new().bold().apply_to(plan.kind),
            format_bytes(plan.disk_mib * MIB),
            plan.disk_mib
        );
        let mut table = new_table();
        table.set_header(header(&["#", "Name", "Filesystem", "Start (MiB)", "Size (MiB)", "Type", "Flags"]));
        for entry in &plan.entries {
            table.add_row(vec![
                Cell::new(entry.number),
                Cell::new(entry.name.as_deref().unwrap_or("-")),
                Cell::new(entry.fs.as_ref().map_or("-", FsKind::as_str)),
                Cell::new(entry.start),
                Cell::new(entry.size),
                Cell::new(entry.code.sfdisk_type(plan.kind.is_gpt())),
                Cell::new(entry.flags.as_deref().unwrap_or("")),
            ]);
        }
        println!("{table}");
        Ok(())
    }

    fn render_disk_table(&self, report: &TableReport) -> io::Result<()> {
        let disk = &report.disk;
        println!(
            "{} {} {:?}{}",
            Style::new().bold().apply_to(disk.device.display()),
            format_bytes(disk.size),
            disk.table,
            disk.model
                .as_deref()
                .map(|m| format!(" ({m})"))
                .unwrap_or_default()
        );
        if !report.run.success {
            return self.render_run_report(&report.run);
        }
        if disk.partitions.is_empty() {
            println!("No partitions.");
            return Ok(());
        }
        let mut table = new_table();
        table.set_header(header(&["#", "Device", "Start", "Size", "Filesystem", "Label", "UUID"]));
        for partition in &disk.partitions {
            table.add_row(vec![
                Cell::new(partition.number),
                Cell::new(partition.device.display()),
                Cell::new(format_bytes(partition.start)),
                Cell::new(format_bytes(partition.size)),
                Cell::new(partition.fs_kind.as_ref().map_or("-", FsKind::as_str)),
                Cell::new(partition.label.as_deref().unwrap_or("-")),
                Cell::new(partition.uuid.as_deref().unwrap_or("-")),
            ]);
        }
        println!("{table}");
        Ok(())
    }

    fn render_run_report(&self, report: &RunReport) -> io::Result<()> {
        let took = format_duration(Duration::from_millis(report.duration_ms));
        let state = if report.success {
            Style::new().green().bold().apply_to(report.state)
        } else {
            Style::new().red().bold().apply_to(report.state)
        };
        println!("{} {state} in {took}", report.operation);

        let mut table = new_table();
        table.set_header(header(&["Step", "Task", "Status", "Time", "Message"]));
        for task in &report.tasks {
            table.add_row(vec![
                Cell::new(task.step),
                Cell::new(&task.description),
                self.status_cell(task),
                Cell::new(
                    task.elapsed
                        .map(|e| format_duration(Duration::from_secs_f64(e.max(0.0))))
                        .unwrap_or_default(),
                ),
                Cell::new(&task.message),
            ]);
        }
        println!("{table}");

        for line in report.failure_details() {
            eprintln!("  {line}");
        }
        Ok(())
    }

    fn status_cell(&self, task: &TaskSnapshot) -> Cell {
        let (text, color) = if task.is_success() {
            ("ok", Color::Green)
        } else if task.is_failed() {
            ("failed", Color::Red)
        } else if task.is_started {
            ("stopped", Color::Yellow)
        } else {
            ("skipped", Color::DarkGrey)
        };
        let cell = Cell::new(text);
        if self.colors {
            cell.fg(color)
        } else {
            cell
        }
    }
}
