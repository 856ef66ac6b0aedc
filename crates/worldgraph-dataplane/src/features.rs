//! Feature ids used for rate-limit policies and usage records.

pub const WORLD_CREATE: &str = "world_create";
pub const WORLD_DELETE: &str = "world_delete";
pub const GRAPH_UPDATE: &str = "graph_update";
pub const GRAPH_QUERY: &str = "graph_query";
pub const SEARCH: &str = "search";

pub const ALL: [&str; 5] = [WORLD_CREATE, WORLD_DELETE, GRAPH_UPDATE, GRAPH_QUERY, SEARCH];
