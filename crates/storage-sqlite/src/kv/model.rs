use diesel::prelude::*;

#[derive(Queryable, Insertable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::kv_store)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct KeyValueDB {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}
