//! Filter, ordering and pagination options for the storage read surface.
//!
//! Each entity has its own options struct. Every field is optional; the
//! default value selects everything. The SQL fragments are assembled with
//! bound parameters only, the option values never end up inside the SQL
//! text.
use serde::Deserialize;

/// How to order node listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOrderBy {
    FirstSeen,
    LastSeen,
    PingCount,
    QueryCount,
    ResponseCount,
}

impl NodeOrderBy {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Self::FirstSeen => "first_seen",
            Self::LastSeen => "last_seen",
            Self::PingCount => "ping_count",
            Self::QueryCount => "query_count",
            Self::ResponseCount => "response_count",
        }
    }
}

/// How to order infohash listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoHashOrderBy {
    FirstSeen,
    LastSeen,
    AnnounceCount,
    PeerCount,
}

impl InfoHashOrderBy {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Self::FirstSeen => "first_seen",
            Self::LastSeen => "last_seen",
            Self::AnnounceCount => "announce_count",
            Self::PeerCount => "peer_count",
        }
    }
}

/// How to order metadata listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataOrderBy {
    DownloadTime,
    Name,
    TotalSize,
    FileCount,
}

impl MetadataOrderBy {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Self::DownloadTime => "download_time",
            Self::Name => "name",
            Self::TotalSize => "total_size",
            Self::FileCount => "file_count",
        }
    }
}

/// Options recognized by `get_nodes` / `count_nodes`.
#[derive(Debug, Clone, Default)]
pub struct NodeQueryOptions {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order_by: Option<NodeOrderBy>,
    pub order_desc: bool,
    pub min_last_seen: Option<u64>,
    pub max_last_seen: Option<u64>,
    pub is_responsive: Option<bool>,
    pub min_ping_count: Option<u64>,
    pub min_response_count: Option<u64>,
}

/// Options recognized by `get_infohashes` / `count_infohashes`.
#[derive(Debug, Clone, Default)]
pub struct InfoHashQueryOptions {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order_by: Option<InfoHashOrderBy>,
    pub order_desc: bool,
    pub min_last_seen: Option<u64>,
    pub max_last_seen: Option<u64>,
    pub has_metadata: Option<bool>,
    pub min_announce_count: Option<u64>,
    pub min_peer_count: Option<u64>,
}

/// Options recognized by `get_metadata_list` / `count_metadata`.
#[derive(Debug, Clone, Default)]
pub struct MetadataQueryOptions {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order_by: Option<MetadataOrderBy>,
    pub order_desc: bool,
    pub name_contains: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub min_file_count: Option<u64>,
    pub min_download_time: Option<u64>,
    pub max_download_time: Option<u64>,
}

/// A `WHERE`/`ORDER BY`/`LIMIT` tail plus its bound parameters.
///
/// Parameters are passed as strings; `SQLite` converts them through the
/// column affinity, which keeps the assembly uniform across types.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SqlTail {
    pub clause: String,
    pub params: Vec<String>,
}

pub(crate) struct SqlTailBuilder {
    filters: Vec<String>,
    params: Vec<String>,
    order: Option<String>,
    limit: Option<(u64, Option<u64>)>,
}

impl SqlTailBuilder {
    pub(crate) fn new() -> Self {
        Self {
            filters: Vec::new(),
            params: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub(crate) fn filter(mut self, condition: &str, param: Option<String>) -> Self {
        if let Some(param) = param {
            self.filters.push(condition.to_string());
            self.params.push(param);
        }
        self
    }

    pub(crate) fn order_by(mut self, column: Option<&'static str>, descending: bool) -> Self {
        if let Some(column) = column {
            let direction = if descending { "DESC" } else { "ASC" };
            self.order = Some(format!("{column} {direction}"));
        }
        self
    }

    pub(crate) fn paginate(mut self, limit: Option<u64>, offset: Option<u64>) -> Self {
        if let Some(limit) = limit {
            self.limit = Some((limit, offset));
        }
        self
    }

    /// The full tail, for row listings.
    pub(crate) fn build(self) -> SqlTail {
        let mut clause = String::new();
        let mut params = self.params;

        if !self.filters.is_empty() {
            clause.push_str(" WHERE ");
            clause.push_str(&self.filters.join(" AND "));
        }

        if let Some(order) = self.order {
            clause.push_str(" ORDER BY ");
            clause.push_str(&order);
        }

        if let Some((limit, offset)) = self.limit {
            clause.push_str(" LIMIT ?");
            params.push(limit.to_string());
            if let Some(offset) = offset {
                clause.push_str(" OFFSET ?");
                params.push(offset.to_string());
            }
        }

        SqlTail { clause, params }
    }

    /// Only the filters, for `COUNT(*)` queries.
    pub(crate) fn build_filters(self) -> SqlTail {
        Self {
            order: None,
            limit: None,
            ..self
        }
        .build()
    }
}

fn bool_param(value: bool) -> String {
    if value { "1".to_string() } else { "0".to_string() }
}

impl NodeQueryOptions {
    pub(crate) fn tail(&self) -> SqlTailBuilder {
        SqlTailBuilder::new()
            .filter("last_seen >= ?", self.min_last_seen.map(|v| v.to_string()))
            .filter("last_seen <= ?", self.max_last_seen.map(|v| v.to_string()))
            .filter("is_responsive = ?", self.is_responsive.map(bool_param))
            .filter("ping_count >= ?", self.min_ping_count.map(|v| v.to_string()))
            .filter("response_count >= ?", self.min_response_count.map(|v| v.to_string()))
            .order_by(self.order_by.map(NodeOrderBy::column), self.order_desc)
            .paginate(self.limit, self.offset)
    }
}

impl InfoHashQueryOptions {
    pub(crate) fn tail(&self) -> SqlTailBuilder {
        SqlTailBuilder::new()
            .filter("last_seen >= ?", self.min_last_seen.map(|v| v.to_string()))
            .filter("last_seen <= ?", self.max_last_seen.map(|v| v.to_string()))
            .filter("has_metadata = ?", self.has_metadata.map(bool_param))
            .filter("announce_count >= ?", self.min_announce_count.map(|v| v.to_string()))
            .filter("peer_count >= ?", self.min_peer_count.map(|v| v.to_string()))
            .order_by(self.order_by.map(InfoHashOrderBy::column), self.order_desc)
            .paginate(self.limit, self.offset)
    }
}

impl MetadataQueryOptions {
    pub(crate) fn tail(&self) -> SqlTailBuilder {
        SqlTailBuilder::new()
            .filter(
                "name LIKE ?",
                self.name_contains.as_ref().map(|needle| format!("%{needle}%")),
            )
            .filter("total_size >= ?", self.min_size.map(|v| v.to_string()))
            .filter("total_size <= ?", self.max_size.map(|v| v.to_string()))
            .filter("file_count >= ?", self.min_file_count.map(|v| v.to_string()))
            .filter("download_time >= ?", self.min_download_time.map(|v| v.to_string()))
            .filter("download_time <= ?", self.max_download_time.map(|v| v.to_string()))
            .order_by(self.order_by.map(MetadataOrderBy::column), self.order_desc)
            .paginate(self.limit, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::{InfoHashQueryOptions, MetadataOrderBy, MetadataQueryOptions, NodeOrderBy, NodeQueryOptions};

    #[test]
    fn default_options_should_produce_an_empty_tail() {
        let tail = NodeQueryOptions::default().tail().build();

        assert_eq!(tail.clause, "");
        assert!(tail.params.is_empty());
    }

    #[test]
    fn filters_should_be_joined_with_and() {
        let options = NodeQueryOptions {
            min_last_seen: Some(100),
            is_responsive: Some(true),
            ..Default::default()
        };

        let tail = options.tail().build();

        assert_eq!(tail.clause, " WHERE last_seen >= ? AND is_responsive = ?");
        assert_eq!(tail.params, vec!["100".to_string(), "1".to_string()]);
    }

    #[test]
    fn ordering_should_append_the_direction() {
        let options = NodeQueryOptions {
            order_by: Some(NodeOrderBy::LastSeen),
            order_desc: true,
            ..Default::default()
        };

        let tail = options.tail().build();

        assert_eq!(tail.clause, " ORDER BY last_seen DESC");
    }

    #[test]
    fn pagination_should_bind_limit_and_offset() {
        let options = InfoHashQueryOptions {
            limit: Some(10),
            offset: Some(20),
            ..Default::default()
        };

        let tail = options.tail().build();

        assert_eq!(tail.clause, " LIMIT ? OFFSET ?");
        assert_eq!(tail.params, vec!["10".to_string(), "20".to_string()]);
    }

    #[test]
    fn an_offset_without_a_limit_should_be_ignored() {
        let options = InfoHashQueryOptions {
            offset: Some(20),
            ..Default::default()
        };

        let tail = options.tail().build();

        assert_eq!(tail.clause, "");
    }

    #[test]
    fn a_name_filter_should_wrap_the_needle_in_wildcards() {
        let options = MetadataQueryOptions {
            name_contains: Some("ubuntu".to_string()),
            order_by: Some(MetadataOrderBy::Name),
            ..Default::default()
        };

        let tail = options.tail().build();

        assert_eq!(tail.clause, " WHERE name LIKE ? ORDER BY name ASC");
        assert_eq!(tail.params, vec!["%ubuntu%".to_string()]);
    }

    #[test]
    fn count_queries_should_keep_filters_and_drop_ordering_and_pagination() {
        let options = MetadataQueryOptions {
            name_contains: Some("iso".to_string()),
            order_by: Some(MetadataOrderBy::TotalSize),
            limit: Some(5),
            ..Default::default()
        };

        let tail = options.tail().build_filters();

        assert_eq!(tail.clause, " WHERE name LIKE ?");
        assert_eq!(tail.params, vec!["%iso%".to_string()]);
    }
}
