use std::collections::{HashMap, HashSet};

use ops_protocol::schema::TableDescriptor;
use serde::Deserialize;

const NORMAL_CLASS: &str = "table";
const SELECTED_CLASS: &str = "selected";
const DEFAULT_NORMAL_STYLE: &str = "fill:#f8fafc,stroke:#94a3b8,color:#0f172a";
const DEFAULT_SELECTED_STYLE: &str = "fill:#dbeafe,stroke:#2563eb,stroke-width:2px,color:#1e3a8a";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum GraphDirection {
    #[default]
    #[serde(rename = "LR")]
    LeftRight,
    #[serde(rename = "TB")]
    TopBottom,
}

impl GraphDirection {
    fn as_str(&self) -> &'static str {
        match self {
            GraphDirection::LeftRight => "LR",
            GraphDirection::TopBottom => "TB",
        }
    }
}

/// Rendering settings for the dependency graph, owned by whoever renders it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GraphStyle {
    pub direction: GraphDirection,
    pub normal_style: String,
    pub highlight_style: String,
}

impl Default for GraphStyle {
    fn default() -> Self {
        Self {
            direction: GraphDirection::default(),
            normal_style: DEFAULT_NORMAL_STYLE.to_string(),
            highlight_style: DEFAULT_SELECTED_STYLE.to_string(),
        }
    }
}

impl GraphStyle {
    /// Mermaid flowchart text: nodes in input order, then one edge per
    /// foreign-key column in input order. Same input gives identical bytes.
    pub fn build(&self, tables: &[TableDescriptor], selected: Option<&str>) -> String {
        let mut ids = NodeIds::default();
        let mut out = format!("flowchart {}\n", self.direction.as_str());
        for table in tables {
            if ids.contains(&table.name) {
                continue;
            }
            let class = if selected == Some(table.name.as_str()) {
                SELECTED_CLASS
            } else {
                NORMAL_CLASS
            };
            out.push_str(&format!(
                "    {}[\"{}\"]:::{class}\n",
                ids.resolve(&table.name),
                escape_label(&table.name)
            ));
        }
        for table in tables {
            for (column, fk) in table.foreign_keys() {
                let from = ids.resolve(&table.name);
                let to = ids.resolve(&fk.table);
                out.push_str(&format!(
                    "    {from} -->|{}| {to}\n",
                    escape_label(&column.name)
                ));
            }
        }
        out.push_str(&format!("    classDef {NORMAL_CLASS} {}\n", self.normal_style));
        out.push_str(&format!(
            "    classDef {SELECTED_CLASS} {}\n",
            self.highlight_style
        ));
        out
    }
}

pub fn build(tables: &[TableDescriptor], selected: Option<&str>) -> String {
    GraphStyle::default().build(tables, selected)
}

/// Table name to Mermaid node id. Names that sanitize to an id already in
/// use get a numeric suffix, assigned in first-seen order.
#[derive(Default)]
struct NodeIds {
    by_name: HashMap<String, String>,
    used: HashSet<String>,
}

impl NodeIds {
    fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    fn resolve(&mut self, name: &str) -> String {
        if let Some(id) = self.by_name.get(name) {
            return id.clone();
        }
        let base = node_id(name);
        let mut id = base.clone();
        let mut suffix = 1;
        while self.used.contains(&id) {
            suffix += 1;
            id = format!("{base}_{suffix}");
        }
        self.used.insert(id.clone());
        self.by_name.insert(name.to_string(), id.clone());
        id
    }
}

fn node_id(name: &str) -> String {
    let id: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect();
    format!("t_{id}")
}

fn escape_label(label: &str) -> String {
    label.replace('"', "#quot;").replace('|', "#124;")
}
