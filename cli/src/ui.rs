use comfy_table::{Cell, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use owo_colors::OwoColorize;

pub fn app_name() -> &'static str {
    "sekiactl"
}

pub fn build_banner() -> String {
    let name = "sekiactl".bright_cyan().bold().to_string();
    let desc = "sekia control-plane client".dimmed().to_string();
    let ver = format!("v{}", env!("CARGO_PKG_VERSION")).bright_yellow().to_string();
    format!("{name} {} {desc} {} {ver}", "•".dimmed(), "•".dimmed())
}

pub fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS).set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn print_error(context: &str, error: &anyhow::Error) {
    let mut table = new_table();
    table.set_width(70);
    table.add_row(vec![Cell::new("⚠ ERROR").fg(Color::Red).add_attribute(comfy_table::Attribute::Bold)]);
    table.add_row(vec![Cell::new(format!("{context}\n\n{error:?}")).fg(Color::Yellow)]);
    eprintln!("{table}");
}
