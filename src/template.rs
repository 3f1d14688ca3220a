use anyhow::{Context as _, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tera::{Context, Tera};

const ITEM: &str = "item";

/// Built-in row templates, written to `item-templates/` on first run.
pub const DEFAULT_ITEM_TEMPLATES: &[(&str, &str)] = &[
    (
        "Pod",
        "{{ item.metadata.name | fill(len=width - 20) }}\
         {{ item.status.phase | default(value=\"\") | fill(len=-12) }}\
         {{ item.metadata.creationTimestamp | default(value=\"\") | age | fill(len=-8) }}",
    ),
    (
        "Node",
        "{{ item.metadata.name | fill(len=width - 8) }}\
         {{ item.metadata.creationTimestamp | default(value=\"\") | age | fill(len=-8) }}",
    ),
    (
        "Deployment",
        "{{ item.metadata.name | fill(len=width - 18) }}\
         {{ item.status.readyReplicas | default(value=0) }}/{{ item.spec.replicas | default(value=0) | fill(len=4) }}\
         {{ item.metadata.creationTimestamp | default(value=\"\") | age | fill(len=-8) }}",
    ),
];

/// Starting text offered when a filter is edited for the first time.
pub const FILTER_TEMPLATE: &str = "{# Rows are kept when this renders to `true`. #}\n\
{{ item.metadata.name != \"\" }}\n";

fn engine(source: &str) -> Result<Tera> {
    let mut tera = Tera::default();
    tera.autoescape_on(Vec::new());
    tera.register_filter("fill", fill);
    tera.register_filter("age", age);
    tera.register_filter("parse_mem", parse_mem);
    tera.register_filter("format_mem", format_mem);
    tera.add_raw_template(ITEM, source)
        .context("failed to compile template")?;
    Ok(tera)
}

fn render(tera: &Tera, item: &Value, width: Option<u16>) -> Result<String> {
    let mut context = Context::new();
    context.insert("item", item);
    if let Some(width) = width {
        context.insert("width", &width);
    }
    tera.render(ITEM, &context)
        .context("failed to render template")
}

/// Row renderer for one resource kind; `item` and `width` are in scope.
pub struct ItemTemplate {
    tera: Tera,
}

impl ItemTemplate {
    pub fn new(source: &str) -> Result<Self> {
        Ok(Self {
            tera: engine(source)?,
        })
    }

    pub fn render(&self, item: &Value, width: u16) -> Result<String> {
        render(&self.tera, item, Some(width))
    }
}

/// Predicate over resources: keeps items whose template renders to `true`.
pub struct Filter {
    source: String,
    tera: Tera,
}

impl Filter {
    pub fn new(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let tera = engine(&source)?;
        Ok(Self { source, tera })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, item: &Value) -> Result<bool> {
        let rendered = render(&self.tera, item, None)?;
        Ok(rendered.trim().eq_ignore_ascii_case("true"))
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter").field("source", &self.source).finish()
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Positive `len` pads on the right, negative on the left; longer text is cut.
pub fn fill_text(text: &str, len: i64) -> String {
    let width = usize::try_from(len.unsigned_abs()).unwrap_or(usize::MAX);
    let mut out = text.chars().take(width).collect::<String>();
    let padding = width - out.chars().count();
    if len >= 0 {
        out.push_str(&" ".repeat(padding));
        out
    } else {
        format!("{}{out}", " ".repeat(padding))
    }
}

fn fill(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let len = args
        .get("len")
        .and_then(Value::as_i64)
        .ok_or_else(|| tera::Error::msg("fill requires an integer `len` argument"))?;
    Ok(Value::String(fill_text(&text_of(value), len)))
}

/// `"Nd"` past one day, `"XhYm"` below that (hours omitted when zero).
pub fn format_age(elapsed: TimeDelta) -> String {
    let seconds = elapsed.num_seconds().max(0);
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }
    let hours = seconds / 3_600;
    let minutes = seconds / 60 % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn age(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let Some(timestamp) = value
        .as_str()
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
    else {
        return Ok(Value::String(String::new()));
    };
    let elapsed = Utc::now().signed_duration_since(timestamp);
    Ok(Value::String(format_age(elapsed)))
}

/// Parses `"512"`, `"64Ki"`, `"2M"`, `"1GB"` style quantities into bytes.
pub fn parse_memory(text: &str) -> Option<u64> {
    const UNITS: [(char, u64); 3] = [('K', 1 << 10), ('M', 1 << 20), ('G', 1 << 30)];

    let raw = text.trim();
    let digits = raw.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let (number, suffix) = raw.split_at(digits);
    let number = number.parse::<u64>().ok()?;

    let mut suffix = suffix.chars();
    let Some(unit) = suffix.next() else {
        return Some(number);
    };
    let (_, multiplier) = UNITS.iter().find(|(name, _)| *name == unit)?;
    match (suffix.next(), suffix.next()) {
        (None, None) | (Some('i' | 'b' | 'B'), None) => number.checked_mul(*multiplier),
        _ => None,
    }
}

pub fn format_memory(bytes: u64) -> String {
    match bytes {
        0..1_024 => format!("{bytes}B"),
        1_024..1_048_576 => format!("{}KB", bytes / 1_024),
        1_048_576..1_073_741_824 => format!("{}MB", bytes / 1_048_576),
        _ => format!("{}GB", bytes / 1_073_741_824),
    }
}

fn parse_mem(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(parse_memory(&text_of(value)).map_or(Value::Null, Value::from))
}

fn format_mem(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let bytes = value
        .as_u64()
        .ok_or_else(|| tera::Error::msg("format_mem expects a byte count"))?;
    Ok(Value::String(format_memory(bytes)))
}

#[cfg(test)]
mod tests {
    use super::{
        DEFAULT_ITEM_TEMPLATES, Filter, ItemTemplate, fill_text, format_age, format_memory,
        parse_memory,
    };
    use chrono::TimeDelta;
    use serde_json::json;

    #[test]
    fn fill_pads_and_truncates() {
        assert_eq!(fill_text("web", 6), "web   ");
        assert_eq!(fill_text("web", -6), "   web");
        assert_eq!(fill_text("frontend", 5), "front");
        assert_eq!(fill_text("x", 0), "");
    }

    #[test]
    fn age_uses_days_or_hours_and_minutes() {
        assert_eq!(format_age(TimeDelta::days(3) + TimeDelta::hours(5)), "3d");
        assert_eq!(format_age(TimeDelta::hours(2) + TimeDelta::minutes(7)), "2h7m");
        assert_eq!(format_age(TimeDelta::minutes(42)), "42m");
        assert_eq!(format_age(TimeDelta::seconds(-5)), "0m");
    }

    #[test]
    fn memory_quantities_round_trip_through_units() {
        assert_eq!(parse_memory("512"), Some(512));
        assert_eq!(parse_memory("64Ki"), Some(64 * 1024));
        assert_eq!(parse_memory("2M"), Some(2 * 1024 * 1024));
        assert_eq!(parse_memory("1GB"), Some(1 << 30));
        assert_eq!(parse_memory("1Gx"), None);
        assert_eq!(parse_memory("lots"), None);

        assert_eq!(format_memory(1_000), "1000B");
        assert_eq!(format_memory(3 * 1024 * 1024 + 5), "3MB");
        assert_eq!(format_memory(5 << 30), "5GB");
    }

    #[test]
    fn item_templates_see_item_and_width() {
        let template =
            ItemTemplate::new("{{ item.metadata.name | fill(len=width - 4) }}{{ item.kind | fill(len=-4) }}")
                .expect("template");
        let item = json!({ "kind": "Pod", "metadata": { "name": "web-0" } });
        assert_eq!(template.render(&item, 12).expect("render"), "web-0    Pod");
    }

    #[test]
    fn memory_filters_compose() {
        let template =
            ItemTemplate::new("{{ item.mem | parse_mem | format_mem }}").expect("template");
        let item = json!({ "mem": "2048Ki" });
        assert_eq!(template.render(&item, 10).expect("render"), "2MB");
    }

    #[test]
    fn default_templates_compile_and_render() {
        let pod = json!({
            "metadata": { "name": "web-0", "creationTimestamp": "2020-01-01T00:00:00Z" },
            "status": { "phase": "Running" },
            "spec": { "replicas": 2 },
        });
        for (kind, source) in DEFAULT_ITEM_TEMPLATES {
            let template = ItemTemplate::new(source).expect(kind);
            let row = template.render(&pod, 60).expect(kind);
            assert!(row.starts_with("web-0"), "{kind}: {row:?}");
        }
    }

    #[test]
    fn filters_keep_items_rendering_true() {
        let filter = Filter::new("{{ item.metadata.namespace == \"prod\" }}").expect("filter");
        assert!(filter.matches(&json!({ "metadata": { "namespace": "prod" } })).expect("match"));
        assert!(!filter.matches(&json!({ "metadata": { "namespace": "dev" } })).expect("match"));
        assert_eq!(filter.source(), "{{ item.metadata.namespace == \"prod\" }}");

        let shouting = Filter::new(" TRUE \n").expect("filter");
        assert!(shouting.matches(&json!({})).expect("match"));
    }

    #[test]
    fn broken_templates_are_reported() {
        assert!(ItemTemplate::new("{{ item.name | fill }}").is_ok());
        assert!(ItemTemplate::new("{{ unclosed").is_err());
        let missing_len = ItemTemplate::new("{{ item.name | fill }}").expect("template");
        assert!(missing_len.render(&json!({ "name": "x" }), 10).is_err());
    }
}
