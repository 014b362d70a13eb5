use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(alias = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub foreign_key: Option<ForeignKeyRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub row_count: Option<i64>,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnDescriptor, &ForeignKeyRef)> {
        self.columns
            .iter()
            .filter_map(|column| column.foreign_key.as_ref().map(|fk| (column, fk)))
    }

    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|column| column.is_primary_key)
            .map(|column| column.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyDescriptor {
    pub table_name: String,
    pub policy_name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub using_expression: Option<String>,
    #[serde(default)]
    pub check_expression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataDescriptor {
    pub version: String,
    #[serde(default)]
    pub last_inspected_at: Option<String>,
    #[serde(default)]
    pub healthy: bool,
    pub database: String,
}

/// Enum type name to its allowed values, in declaration order.
pub type EnumDictionary = BTreeMap<String, Vec<String>>;

/// Point-in-time bundle of schema metadata, replaced wholesale on refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableDescriptor>,
    #[serde(default)]
    pub enums: EnumDictionary,
    #[serde(default)]
    pub policies: Vec<PolicyDescriptor>,
    #[serde(default)]
    pub metadata: Option<MetadataDescriptor>,
}

/// One foreign-key edge, `from_table.from_column -> to_table.to_column`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Relation {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|table| table.name == name)
    }

    pub fn relations(&self) -> Vec<Relation> {
        self.tables
            .iter()
            .flat_map(|table| {
                table.foreign_keys().map(move |(column, fk)| Relation {
                    from_table: table.name.clone(),
                    from_column: column.name.clone(),
                    to_table: fk.table.clone(),
                    to_column: fk.column.clone(),
                })
            })
            .collect()
    }

    pub fn policies_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a PolicyDescriptor> {
        self.policies
            .iter()
            .filter(move |policy| policy.table_name == table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SchemaSnapshot {
        serde_json::from_str(
            r#"{
                "tables": [
                    {"name":"users","row_count":12,"columns":[
                        {"name":"id","type":"uuid","is_primary_key":true}
                    ]},
                    {"name":"orders","description":"customer orders","columns":[
                        {"name":"id","data_type":"uuid","is_primary_key":true},
                        {"name":"user_id","data_type":"uuid","nullable":true,
                         "foreign_key":{"table":"users","column":"id"}}
                    ]}
                ],
                "enums": {"order_state":["open","paid","shipped"]},
                "policies": [{"table_name":"orders","policy_name":"owner_read","roles":["authenticated"]}]
            }"#,
        )
        .expect("deserialize")
    }

    #[test]
    fn reads_column_type_alias() {
        let snapshot = snapshot();
        let users = snapshot.table("users").expect("users");
        assert_eq!(users.columns[0].data_type, "uuid");
        assert_eq!(users.primary_key(), vec!["id"]);
        assert!(snapshot.metadata.is_none());
    }

    #[test]
    fn lists_relations_in_table_order() {
        let snapshot = snapshot();
        let relations = snapshot.relations();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].from_table, "orders");
        assert_eq!(relations[0].from_column, "user_id");
        assert_eq!(relations[0].to_table, "users");
        assert_eq!(relations[0].to_column, "id");
    }

    #[test]
    fn enum_values_keep_declaration_order() {
        let snapshot = snapshot();
        assert_eq!(
            snapshot.enums.get("order_state").map(Vec::as_slice),
            Some(&["open".to_string(), "paid".to_string(), "shipped".to_string()][..])
        );
        assert_eq!(snapshot.policies_for("orders").count(), 1);
        assert_eq!(snapshot.policies_for("users").count(), 0);
    }
}
