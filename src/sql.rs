use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{BookingStatus, Role};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: Ulid,
        username: String,
        email: String,
        role: Role,
    },
    DeleteUser {
        id: Ulid,
    },
    InsertRoom {
        id: Ulid,
        number: String,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        room_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        purpose: Option<String>,
        faculty_email: Option<String>,
    },
    ApproveBooking {
        id: Ulid,
    },
    RejectBooking {
        id: Ulid,
        reason: Option<String>,
    },
    CancelBooking {
        id: Ulid,
    },
    /// Administrative hard delete.
    DestroyBooking {
        id: Ulid,
    },
    SelectBookings {
        room_id: Option<Ulid>,
        date: Option<NaiveDate>,
        status: Option<BookingStatus>,
        requester: Option<Ulid>,
    },
    SelectRooms,
    SelectUsers,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "users" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("users", 4, values.len()));
            }
            Ok(Command::InsertUser {
                id: parse_ulid(&values[0])?,
                username: parse_string(&values[1])?,
                email: parse_string(&values[2])?,
                role: parse_role(&values[3])?,
            })
        }
        "rooms" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("rooms", 2, values.len()));
            }
            Ok(Command::InsertRoom {
                id: parse_ulid(&values[0])?,
                number: parse_string(&values[1])?,
            })
        }
        "bookings" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("bookings", 5, values.len()));
            }
            let purpose = if values.len() >= 6 {
                parse_string_or_null(&values[5])?
            } else {
                None
            };
            let faculty_email = if values.len() >= 7 {
                parse_string_or_null(&values[6])?
            } else {
                None
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                room_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                start: parse_time(&values[3])?,
                end: parse_time(&values[4])?,
                purpose,
                faculty_email,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "users" => Ok(Command::DeleteUser { id }),
        "rooms" => Ok(Command::DeleteRoom { id }),
        "bookings" => Ok(Command::DestroyBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Status transitions ride on `UPDATE bookings SET status = '…' WHERE id = '…'`.
fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut status: Option<BookingStatus> = None;
    let mut reason: Option<String> = None;
    for assignment in assignments {
        let col = assignment_column(&assignment.target)?;
        match col.as_str() {
            "status" => status = Some(parse_status(&assignment.value)?),
            "rejection_reason" => reason = parse_string_or_null(&assignment.value)?,
            other => {
                return Err(SqlError::Unsupported(format!("cannot update column: {other}")));
            }
        }
    }

    let id = extract_where_id(selection)?;
    match status {
        Some(BookingStatus::Approved) => Ok(Command::ApproveBooking { id }),
        Some(BookingStatus::Rejected) => Ok(Command::RejectBooking { id, reason }),
        Some(BookingStatus::Cancelled) => Ok(Command::CancelBooking { id }),
        Some(BookingStatus::Pending) => Err(SqlError::Unsupported(
            "cannot set status back to pending".into(),
        )),
        None => Err(SqlError::MissingFilter("status")),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "users" => Ok(Command::SelectUsers),
        "bookings" => {
            let (mut room_id, mut date, mut status, mut requester) = (None, None, None, None);
            if let Some(selection) = &select.selection {
                extract_booking_filters(
                    selection,
                    &mut room_id,
                    &mut date,
                    &mut status,
                    &mut requester,
                )?;
            }
            Ok(Command::SelectBookings {
                room_id,
                date,
                status,
                requester,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_booking_filters(
    expr: &Expr,
    room_id: &mut Option<Ulid>,
    date: &mut Option<NaiveDate>,
    status: &mut Option<BookingStatus>,
    requester: &mut Option<Ulid>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_booking_filters(left, room_id, date, status, requester)?;
                extract_booking_filters(right, room_id, date, status, requester)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("room_id") => *room_id = Some(parse_ulid(right)?),
                Some("date") => *date = Some(parse_date(right)?),
                Some("status") => *status = Some(parse_status(right)?),
                Some("requester") => *requester = Some(parse_ulid(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn assignment_column(target: &AssignmentTarget) -> Result<String, SqlError> {
    match target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) => Ok(Some(s.clone())),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// Calendar date literal: 'YYYY-MM-DD'.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date: {e}")))
}

/// Time-of-day literal: 'HH:MM' or 'HH:MM:SS'.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time: {e}")))
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_string(expr)?;
    s.parse().map_err(SqlError::Parse)
}

fn parse_role(expr: &Expr) -> Result<Role, SqlError> {
    let s = parse_string(expr)?;
    s.parse().map_err(SqlError::Parse)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
