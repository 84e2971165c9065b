/// A game server registration, as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
  /// Assigned row id
  pub id: i64,
  /// Discord guild ID owning this registration
  pub guild_id: u64,
  /// Canonical `host:port` of the remote
  pub remote: String,
  /// Optional human label
  pub label: Option<String>,
  /// Unix timestamp when this was created
  pub inserted_at: i64,
  /// Unix timestamp of the last change
  pub updated_at: i64,
}

