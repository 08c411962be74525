//! Month-scoped document numbering.
//!
//! Numbers look like `TRF-202608-0007`: document type, calendar year+month,
//! running sequence starting at 1. The sequence lives in `document_counters`
//! and is advanced with a conditional update, so two concurrent approvals
//! cannot be handed the same number; a lost race is retried with a freshly
//! read counter.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, SqlErr};
use tracing::{debug, instrument};

use crate::entities::document_counter;
use crate::errors::ServiceError;

/// Document type tag for purchase requisitions.
pub const DOC_TYPE_REQUEST: &str = "PR";
/// Document type tag for internal stock-transfer work orders.
pub const DOC_TYPE_TRANSFER: &str = "TRF";

const MAX_ATTEMPTS: usize = 5;

/// Year+month bucket for a point in time, e.g. "202608".
pub fn period_tag(at: DateTime<Utc>) -> String {
    at.format("%Y%m").to_string()
}

/// Formats a full document number from its parts.
pub fn format_number(doc_type: &str, period: &str, seq: i32) -> String {
    format!("{doc_type}-{period}-{seq:04}")
}

/// Claims the next sequence for (doc_type, period).
///
/// `floor` is the highest sequence already present in the target document
/// table for this period; the counter never hands out a value at or below
/// it, which keeps numbering collision-free over data that predates the
/// counter table.
#[instrument(skip(db))]
pub async fn next_sequence<C: ConnectionTrait>(
    db: &C,
    doc_type: &str,
    period: &str,
    floor: i32,
) -> Result<i32, ServiceError> {
    for attempt in 0..MAX_ATTEMPTS {
        let existing = document_counter::Entity::find_by_id((doc_type.to_string(), period.to_string()))
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        match existing {
            Some(counter) => {
                let next = counter.last_seq.max(floor) + 1;
                let result = document_counter::Entity::update_many()
                    .col_expr(document_counter::Column::LastSeq, Expr::value(next))
                    .col_expr(document_counter::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(document_counter::Column::DocType.eq(doc_type))
                    .filter(document_counter::Column::Period.eq(period))
                    .filter(document_counter::Column::LastSeq.eq(counter.last_seq))
                    .exec(db)
                    .await
                    .map_err(ServiceError::DatabaseError)?;

                if result.rows_affected == 1 {
                    return Ok(next);
                }
                debug!(doc_type, period, attempt, "Lost sequence race, retrying");
            }
            None => {
                let next = floor + 1;
                let row = document_counter::ActiveModel {
                    doc_type: Set(doc_type.to_string()),
                    period: Set(period.to_string()),
                    last_seq: Set(next),
                    updated_at: Set(Some(Utc::now())),
                };
                match row.insert(db).await {
                    Ok(_) => return Ok(next),
                    // Another writer created the counter first; retry the
                    // conditional-increment path.
                    Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                        debug!(doc_type, period, attempt, "Counter created concurrently, retrying");
                    }
                    Err(e) => return Err(ServiceError::DatabaseError(e)),
                }
            }
        }
    }

    Err(ServiceError::DocumentNumberCollision(format!(
        "{doc_type}-{period}: could not claim a sequence after {MAX_ATTEMPTS} attempts"
    )))
}

/// Parses the sequence suffix of a document number minted by this module.
pub fn parse_sequence(number: &str) -> Option<i32> {
    number.rsplit('-').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn period_tag_is_year_month() {
        let at = Utc.with_ymd_and_hms(2026, 8, 29, 10, 0, 0).unwrap();
        assert_eq!(period_tag(at), "202608");
    }

    #[test]
    fn number_formatting_round_trips() {
        let number = format_number(DOC_TYPE_TRANSFER, "202608", 7);
        assert_eq!(number, "TRF-202608-0007");
        assert_eq!(parse_sequence(&number), Some(7));

        assert_eq!(format_number(DOC_TYPE_REQUEST, "202612", 1234), "PR-202612-1234");
        assert_eq!(parse_sequence("PR-202612-1234"), Some(1234));
    }

    #[test]
    fn parse_sequence_rejects_garbage() {
        assert_eq!(parse_sequence("not-a-number-x"), None);
    }
}
