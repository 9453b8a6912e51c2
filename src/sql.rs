use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{parse_time, ValidationError};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: RoomId,
        name: String,
        equipment: String,
    },
    SelectRooms,
    UpsertSetting {
        key: String,
        value: String,
    },
    SelectSettings {
        key: Option<String>,
    },
    SelectSlots {
        duration: Option<Minutes>,
    },
    SelectAvailability {
        room_id: RoomId,
        date: NaiveDate,
        start: ClockTime,
        /// `None`: start plus the configured session duration.
        end: Option<ClockTime>,
    },
    InsertBooking(NewBooking),
    InsertStatusChange {
        booking_id: BookingId,
        status: BookingStatus,
    },
    DeleteBooking {
        id: BookingId,
        requester_id: Option<RequesterId>,
    },
    SelectBookings {
        filter: BookingFilter,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let arity = |name: &'static str, min: usize| {
        if values.len() < min {
            Err(SqlError::WrongArity(name, min, values.len()))
        } else {
            Ok(())
        }
    };

    match table.as_str() {
        "rooms" => {
            arity("rooms", 2)?;
            Ok(Command::InsertRoom {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                equipment: optional(&values, 2, parse_string)?.unwrap_or_default(),
            })
        }
        "settings" => {
            arity("settings", 2)?;
            Ok(Command::UpsertSetting {
                key: parse_string(&values[0])?,
                value: parse_string(&values[1])?,
            })
        }
        "bookings" => {
            arity("bookings", 4)?;
            Ok(Command::InsertBooking(NewBooking {
                room_id: parse_ulid(&values[0])?,
                requester_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                start: parse_clock(&values[3])?,
                equipment: optional(&values, 4, parse_string)?.unwrap_or_default(),
            }))
        }
        "status_changes" => {
            arity("status_changes", 2)?;
            Ok(Command::InsertStatusChange {
                booking_id: parse_ulid(&values[0])?,
                status: parse_status(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = where_equalities(delete.selection.as_ref())?;
    let mut id = None;
    let mut requester_id = None;
    for (col, expr) in filters {
        match col.as_str() {
            "id" => id = Some(parse_ulid(expr)?),
            "requester_id" => requester_id = Some(parse_ulid(expr)?),
            _ => return Err(SqlError::Unsupported(format!("filter on {col}"))),
        }
    }
    Ok(Command::DeleteBooking {
        id: id.ok_or(SqlError::MissingFilter("id"))?,
        requester_id,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = where_equalities(select.selection.as_ref())?;
    let unsupported = |col: &str| SqlError::Unsupported(format!("filter on {col} in {table}"));

    match table.as_str() {
        "rooms" => match filters.first() {
            Some((col, _)) => Err(unsupported(col)),
            None => Ok(Command::SelectRooms),
        },
        "settings" => {
            let mut key = None;
            for (col, expr) in filters {
                match col.as_str() {
                    "key" => key = Some(parse_string(expr)?),
                    _ => return Err(unsupported(&col)),
                }
            }
            Ok(Command::SelectSettings { key })
        }
        "slots" => {
            let mut duration = None;
            for (col, expr) in filters {
                match col.as_str() {
                    "duration" => duration = Some(parse_minutes(expr)?),
                    _ => return Err(unsupported(&col)),
                }
            }
            Ok(Command::SelectSlots { duration })
        }
        "availability" => {
            let (mut room_id, mut date, mut start, mut end) = (None, None, None, None);
            for (col, expr) in filters {
                match col.as_str() {
                    "room_id" => room_id = Some(parse_ulid(expr)?),
                    "date" => date = Some(parse_date(expr)?),
                    "start" => start = Some(parse_clock(expr)?),
                    "end" => end = Some(parse_clock(expr)?),
                    _ => return Err(unsupported(&col)),
                }
            }
            Ok(Command::SelectAvailability {
                room_id: room_id.ok_or(SqlError::MissingFilter("room_id"))?,
                date: date.ok_or(SqlError::MissingFilter("date"))?,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end,
            })
        }
        "bookings" => {
            let mut filter = BookingFilter::default();
            for (col, expr) in filters {
                match col.as_str() {
                    "id" => filter.id = Some(parse_ulid(expr)?),
                    "room_id" => filter.room_id = Some(parse_ulid(expr)?),
                    "date" => filter.date = Some(parse_date(expr)?),
                    "requester_id" => filter.requester_id = Some(parse_ulid(expr)?),
                    "status" => filter.status = Some(parse_status(expr)?),
                    _ => return Err(unsupported(&col)),
                }
            }
            Ok(Command::SelectBookings { filter })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Which row shape a statement produces, for describing prepared
/// statements before their parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Rooms,
    Settings,
    Slots,
    Availability,
    Bookings,
    /// Command tag only.
    None,
}

pub fn result_shape(sql: &str) -> ResultShape {
    let dialect = PostgreSqlDialect {};
    let Ok(stmts) = Parser::parse_sql(&dialect, sql) else {
        return ResultShape::None;
    };
    let table = match stmts.first() {
        Some(Statement::Insert(insert)) => match insert_table_name(insert) {
            Ok(t) if t == "bookings" => return ResultShape::Bookings,
            _ => return ResultShape::None,
        },
        Some(Statement::Query(query)) => match query.body.as_ref() {
            SetExpr::Select(select) => select
                .from
                .first()
                .and_then(|f| table_factor_name(&f.relation).ok()),
            _ => None,
        },
        _ => None,
    };
    match table.as_deref() {
        Some("rooms") => ResultShape::Rooms,
        Some("settings") => ResultShape::Settings,
        Some("slots") => ResultShape::Slots,
        Some("availability") => ResultShape::Availability,
        Some("bookings") => ResultShape::Bookings,
        _ => ResultShape::None,
    }
}

/// Flatten `a = x AND b = y AND ...` into `(column, value)` pairs.
fn where_equalities(selection: Option<&Expr>) -> Result<Vec<(String, &Expr)>, SqlError> {
    fn walk<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => walk(inner, out),
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                walk(left, out)?;
                walk(right, out)
            }
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::Eq,
                right,
            } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("condition {expr}")))?;
                out.push((col, &**right));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("condition {other}"))),
        }
    }

    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk(expr, &mut out)?;
    }
    Ok(out)
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// The single row of an `INSERT ... VALUES (...)`.
fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn optional<T>(
    values: &[Expr],
    idx: usize,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    match values.get(idx) {
        None => Ok(None),
        Some(expr) if matches!(extract_value(expr), Some(Value::Null)) => Ok(None),
        Some(expr) => parse(expr).map(Some),
    }
}

/// Literal text. Numbers and booleans are taken as written.
fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(n, _)) => Ok(n.clone()),
        Some(Value::Boolean(b)) => Ok(b.to_string()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| SqlError::Invalid(ValidationError::InvalidDate(s)))
}

fn parse_clock(expr: &Expr) -> Result<ClockTime, SqlError> {
    parse_time(&parse_string(expr)?).map_err(SqlError::Invalid)
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    parse_string(expr)?
        .parse()
        .map_err(|s| SqlError::Invalid(ValidationError::InvalidStatus(s)))
}

fn parse_minutes(expr: &Expr) -> Result<Minutes, SqlError> {
    let s = parse_string(expr)?;
    match s.trim().parse::<Minutes>() {
        Ok(m) if m > 0 => Ok(m),
        _ => Err(SqlError::Invalid(ValidationError::InvalidDuration(s))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    /// Well-formed SQL carrying a value the domain rejects.
    Invalid(ValidationError),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::Invalid(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const REQUESTER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    #[test]
    fn parse_insert_room() {
        let sql = format!(
            "INSERT INTO rooms (id, name, equipment) VALUES ('{ROOM}', 'SMART Lab 3', '20 PCs')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertRoom {
                id: ROOM.parse().unwrap(),
                name: "SMART Lab 3".into(),
                equipment: "20 PCs".into(),
            }
        );
    }

    #[test]
    fn parse_insert_room_without_equipment() {
        let sql = format!("INSERT INTO rooms (id, name) VALUES ('{ROOM}', 'Gym')");
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom { equipment, .. } => assert_eq!(equipment, ""),
            other => panic!("expected InsertRoom, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_rooms() {
        assert_eq!(parse_sql("SELECT * FROM rooms").unwrap(), Command::SelectRooms);
    }

    #[test]
    fn parse_upsert_setting_accepts_number() {
        let cmd = parse_sql("INSERT INTO settings (key, value) VALUES ('session_duration', 60)")
            .unwrap();
        assert_eq!(
            cmd,
            Command::UpsertSetting {
                key: "session_duration".into(),
                value: "60".into(),
            }
        );
    }

    #[test]
    fn parse_select_settings() {
        assert_eq!(
            parse_sql("SELECT * FROM settings").unwrap(),
            Command::SelectSettings { key: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM settings WHERE key = 'lab_status'").unwrap(),
            Command::SelectSettings {
                key: Some("lab_status".into())
            }
        );
    }

    #[test]
    fn parse_select_slots() {
        assert_eq!(
            parse_sql("SELECT * FROM slots").unwrap(),
            Command::SelectSlots { duration: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM slots WHERE duration = 60").unwrap(),
            Command::SelectSlots { duration: Some(60) }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM slots WHERE duration = 0"),
            Err(SqlError::Invalid(ValidationError::InvalidDuration(_)))
        ));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            r#"SELECT * FROM availability WHERE room_id = '{ROOM}' AND date = '2024-05-01' AND start = '08:40' AND "end" = '09:20'"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                room_id: ROOM.parse().unwrap(),
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                start: ClockTime::hm(8, 40),
                end: Some(ClockTime::hm(9, 20)),
            }
        );
    }

    #[test]
    fn parse_select_availability_without_end() {
        let sql = format!(
            "SELECT * FROM availability WHERE room_id = '{ROOM}' AND date = '2024-05-01' AND start = '08:00'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { end, .. } => assert_eq!(end, None),
            other => panic!("expected SelectAvailability, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_availability_requires_room() {
        let sql = "SELECT * FROM availability WHERE date = '2024-05-01' AND start = '08:00'";
        assert_eq!(parse_sql(sql), Err(SqlError::MissingFilter("room_id")));
    }

    #[test]
    fn parse_insert_booking() {
        let sql = format!(
            "INSERT INTO bookings (room_id, requester_id, date, start, equipment) VALUES ('{ROOM}', '{REQUESTER}', '2024-05-01', '08:00', 'Projector')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking(NewBooking {
                room_id: ROOM.parse().unwrap(),
                requester_id: REQUESTER.parse().unwrap(),
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                start: ClockTime::hm(8, 0),
                equipment: "Projector".into(),
            })
        );
    }

    #[test]
    fn parse_insert_booking_bad_time_is_validation() {
        let sql = format!(
            "INSERT INTO bookings (room_id, requester_id, date, start) VALUES ('{ROOM}', '{REQUESTER}', '2024-05-01', '8am')"
        );
        assert_eq!(
            parse_sql(&sql),
            Err(SqlError::Invalid(ValidationError::InvalidTimeFormat("8am".into())))
        );
    }

    #[test]
    fn parse_insert_booking_bad_date_is_validation() {
        let sql = format!(
            "INSERT INTO bookings (room_id, requester_id, date, start) VALUES ('{ROOM}', '{REQUESTER}', '2024-02-30', '08:00')"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::Invalid(ValidationError::InvalidDate(_)))
        ));
    }

    #[test]
    fn parse_insert_booking_arity() {
        let sql = format!("INSERT INTO bookings (room_id, requester_id) VALUES ('{ROOM}', '{REQUESTER}')");
        assert_eq!(parse_sql(&sql), Err(SqlError::WrongArity("bookings", 4, 2)));
    }

    #[test]
    fn parse_status_change() {
        let sql = format!("INSERT INTO status_changes (booking_id, status) VALUES ('{ROOM}', 'approved')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertStatusChange {
                booking_id: ROOM.parse().unwrap(),
                status: BookingStatus::Approved,
            }
        );
        let bad = format!("INSERT INTO status_changes (booking_id, status) VALUES ('{ROOM}', 'Maybe')");
        assert!(matches!(
            parse_sql(&bad),
            Err(SqlError::Invalid(ValidationError::InvalidStatus(_)))
        ));
    }

    #[test]
    fn parse_delete_booking() {
        let sql = format!("DELETE FROM bookings WHERE id = '{ROOM}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DeleteBooking {
                id: ROOM.parse().unwrap(),
                requester_id: None,
            }
        );
        let sql = format!("DELETE FROM bookings WHERE id = '{ROOM}' AND requester_id = '{REQUESTER}'");
        match parse_sql(&sql).unwrap() {
            Command::DeleteBooking { requester_id, .. } => {
                assert_eq!(requester_id, Some(REQUESTER.parse().unwrap()))
            }
            other => panic!("expected DeleteBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_delete_requires_id() {
        assert_eq!(
            parse_sql("DELETE FROM bookings"),
            Err(SqlError::MissingFilter("id"))
        );
        assert!(matches!(
            parse_sql("DELETE FROM rooms WHERE id = 'x'"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_select_bookings_filters() {
        let sql = format!(
            "SELECT * FROM bookings WHERE room_id = '{ROOM}' AND date = '2024-05-01' AND status = 'Pending'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectBookings { filter } => {
                assert_eq!(filter.room_id, Some(ROOM.parse().unwrap()));
                assert_eq!(filter.date, NaiveDate::from_ymd_opt(2024, 5, 1));
                assert_eq!(filter.status, Some(BookingStatus::Pending));
                assert_eq!(filter.requester_id, None);
            }
            other => panic!("expected SelectBookings, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_range_conditions() {
        let sql = "SELECT * FROM bookings WHERE start >= '08:00'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM reports"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn result_shape_with_placeholders() {
        assert_eq!(
            result_shape("INSERT INTO bookings (room_id, requester_id, date, start) VALUES ($1, $2, $3, $4)"),
            ResultShape::Bookings
        );
        assert_eq!(
            result_shape("SELECT * FROM availability WHERE room_id = $1 AND date = $2 AND start = $3"),
            ResultShape::Availability
        );
        assert_eq!(result_shape("SELECT * FROM slots"), ResultShape::Slots);
        assert_eq!(
            result_shape("INSERT INTO status_changes (booking_id, status) VALUES ($1, $2)"),
            ResultShape::None
        );
        assert_eq!(result_shape("DELETE FROM bookings WHERE id = $1"), ResultShape::None);
    }

    #[test]
    fn parse_empty_errors() {
        assert_eq!(parse_sql(""), Err(SqlError::Empty));
    }

    #[test]
    fn parse_garbage_is_parse_error() {
        assert!(matches!(parse_sql("BOOK ROOM 1"), Err(SqlError::Parse(_))));
    }
}
