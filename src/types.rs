/// Identifier for the table source that served a query.
/// Examples: `rest`, `memory::floods`
pub type SourceId = String;
/// Upstream table name.
/// Examples: `floods`, `flood_submissions`
pub type TableName = String;
/// Upstream column name.
/// Examples: `year`, `location_name`, `cause_of_flood`
pub type ColumnName = String;
/// Identifier a contributor submits corrections under (usually an email).
/// Example: `maria@example.gr`
pub type ContributorId = String;
/// Upstream primary key of a flood record.
pub type FloodId = i64;
/// Monotonic sequence number attached to in-flight option loads.
pub type Sequence = u64;
/// Identifier of a user-facing notice.
pub type NoticeId = u64;
