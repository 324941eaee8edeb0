use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Remote tables the client reads, writes and watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Servers,
    Channels,
    ServerMembers,
    Messages,
    ChannelReads,
    AppConfig,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Servers => "servers",
            Self::Channels => "channels",
            Self::ServerMembers => "server_members",
            Self::Messages => "messages",
            Self::ChannelReads => "channel_reads",
            Self::AppConfig => "app_config",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "users" => Self::Users,
            "servers" => Self::Servers,
            "channels" => Self::Channels,
            "server_members" => Self::ServerMembers,
            "messages" => Self::Messages,
            "channel_reads" => Self::ChannelReads,
            "app_config" => Self::AppConfig,
            other => return Err(format!("unknown table: {}", other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// A row change pushed by the change feed. Rows are raw table rows, no joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
}

impl ChangeEvent {
    pub fn insert<T: Serialize>(table: Table, row: &T) -> serde_json::Result<Self> {
        Ok(Self {
            table,
            kind: ChangeKind::Insert,
            record: Some(serde_json::to_value(row)?),
            old_record: None,
        })
    }

    pub fn update<T: Serialize>(table: Table, row: &T) -> serde_json::Result<Self> {
        Ok(Self {
            table,
            kind: ChangeKind::Update,
            record: Some(serde_json::to_value(row)?),
            old_record: None,
        })
    }

    pub fn delete<T: Serialize>(table: Table, old_row: &T) -> serde_json::Result<Self> {
        Ok(Self {
            table,
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(serde_json::to_value(old_row)?),
        })
    }

    /// The row the event is about: the new record, or the old one for deletes.
    pub fn row(&self) -> Option<&Value> {
        self.record.as_ref().or(self.old_record.as_ref())
    }

    pub fn row_id(&self) -> Option<Uuid> {
        self.row()?.get("id")?.as_str()?.parse().ok()
    }

    pub fn column(&self, name: &str) -> Option<String> {
        self.row()?.get(name).and_then(value_text)
    }

    pub fn record_as<T: DeserializeOwned>(&self) -> serde_json::Result<Option<T>> {
        self.record.clone().map(serde_json::from_value).transpose()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Only(ChangeKind),
}

impl EventFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "*",
            Self::Only(kind) => kind.as_str(),
        }
    }
}

/// Which changes a subscription wants: one table, optionally one kind,
/// optionally one `column = value` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: Table,
    pub event: EventFilter,
    pub eq: Option<(String, String)>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            event: EventFilter::All,
            eq: None,
        }
    }

    pub fn only(mut self, kind: ChangeKind) -> Self {
        self.event = EventFilter::Only(kind);
        self
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.eq = Some((column.to_string(), value.to_string()));
        self
    }

    /// Filter expression in the table API's dialect, e.g. `channel_id=eq.<id>`.
    pub fn expr(&self) -> Option<String> {
        self.eq
            .as_ref()
            .map(|(column, value)| format!("{}=eq.{}", column, value))
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if let EventFilter::Only(kind) = self.event {
            if event.kind != kind {
                return false;
            }
        }
        match &self.eq {
            Some((column, value)) => event.column(column).as_deref() == Some(value.as_str()),
            None => true,
        }
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_event(kind: ChangeKind, channel: &str) -> ChangeEvent {
        let row = json!({ "id": Uuid::new_v4(), "channel_id": channel, "content": "hi" });
        ChangeEvent {
            table: Table::Messages,
            kind,
            record: (kind != ChangeKind::Delete).then(|| row.clone()),
            old_record: (kind == ChangeKind::Delete).then_some(row),
        }
    }

    #[test]
    fn filter_checks_table_kind_and_column() {
        let filter = ChangeFilter::table(Table::Messages)
            .only(ChangeKind::Insert)
            .eq("channel_id", "abc");

        assert!(filter.matches(&message_event(ChangeKind::Insert, "abc")));
        assert!(!filter.matches(&message_event(ChangeKind::Insert, "xyz")));
        assert!(!filter.matches(&message_event(ChangeKind::Update, "abc")));

        let mut other_table = message_event(ChangeKind::Insert, "abc");
        other_table.table = Table::Channels;
        assert!(!filter.matches(&other_table));
    }

    #[test]
    fn delete_events_match_on_old_record() {
        let filter = ChangeFilter::table(Table::Messages).eq("channel_id", "abc");
        let event = message_event(ChangeKind::Delete, "abc");
        assert!(filter.matches(&event));
        assert!(event.row_id().is_some());
    }

    #[test]
    fn filter_expression_uses_eq_operator() {
        let filter = ChangeFilter::table(Table::ServerMembers).eq("server_id", 42);
        assert_eq!(filter.expr().as_deref(), Some("server_id=eq.42"));
        assert_eq!(filter.event.as_str(), "*");
        assert_eq!(ChangeFilter::table(Table::Servers).expr(), None);
    }

    #[test]
    fn table_names_round_trip_through_str() {
        for table in [Table::Users, Table::ServerMembers, Table::ChannelReads, Table::AppConfig] {
            assert_eq!(table.as_str().parse::<Table>(), Ok(table));
        }
        assert!("nope".parse::<Table>().is_err());
    }
}
