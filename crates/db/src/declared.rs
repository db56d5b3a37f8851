//! Declared column types of a SQLite statement.
//!
//! sqlx keeps only the declarations it maps to a Rust type, so a `NUMERIC`
//! or `DECIMAL(10,2)` column reaches the decoder untyped. The declarations
//! are read from SQLite itself by preparing the statement on the raw handle.

use std::ffi::{CStr, CString};
use std::ptr;

use libsqlite3_sys::{
    sqlite3_column_count, sqlite3_column_decltype, sqlite3_finalize, sqlite3_prepare_v2,
    sqlite3_stmt, SQLITE_OK,
};
use sqlx::sqlite::SqliteConnection;

/// One entry per result column; `None` for expressions, which have no
/// declaration. Statements SQLite cannot prepare yield an empty list and
/// fail properly when executed.
pub async fn column_types(
    connection: &mut SqliteConnection,
    sql: &str,
) -> Result<Vec<Option<String>>, sqlx::Error> {
    let Ok(sql) = CString::new(sql) else {
        return Ok(Vec::new());
    };
    let mut handle = connection.lock_handle().await?;
    let db = handle.as_raw_handle().as_ptr();
    let mut statement: *mut sqlite3_stmt = ptr::null_mut();

    // SAFETY: `db` is valid while `handle` holds the connection lock, and
    // the statement is finalized before the lock is released.
    unsafe {
        let status = sqlite3_prepare_v2(db, sql.as_ptr(), -1, &mut statement, ptr::null_mut());
        if status != SQLITE_OK || statement.is_null() {
            sqlite3_finalize(statement);
            return Ok(Vec::new());
        }

        let types = (0..sqlite3_column_count(statement))
            .map(|index| {
                let declared = sqlite3_column_decltype(statement, index);
                (!declared.is_null())
                    .then(|| CStr::from_ptr(declared).to_string_lossy().into_owned())
            })
            .collect();
        sqlite3_finalize(statement);
        Ok(types)
    }
}
