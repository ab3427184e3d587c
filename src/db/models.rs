/// Row type of the `rogue_runs` table (see migrations/).
/// `record_data` holds the serialized RunRecord.
#[derive(Debug, sqlx::FromRow)]
#[allow(dead_code)]
pub struct RunRow {
    pub id: String,
    pub uid: String,
    pub theme: String,
    pub start_ts: i64,
    pub record_data: String,
}
