use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input. Values are positional, in the column
/// order documented per table; trailing optional columns may be omitted.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBusiness {
        id: Ulid,
        name: Option<String>,
        buffer_minutes: Option<Minutes>,
        min_notice_hours: Option<i64>,
        slot_minutes: Option<Minutes>,
    },
    UpdateBusiness {
        id: Ulid,
        name: Option<String>,
        buffer_minutes: Option<Minutes>,
        min_notice_hours: Option<i64>,
        slot_minutes: Option<Minutes>,
    },
    DeleteBusiness {
        id: Ulid,
    },
    InsertHours {
        business_id: Ulid,
        day_of_week: u8,
        hours: DayHours,
    },
    DeleteHours {
        business_id: Ulid,
        day_of_week: u8,
    },
    InsertService {
        business_id: Ulid,
        service: Service,
    },
    DeleteService {
        id: Ulid,
    },
    InsertAddOn {
        business_id: Ulid,
        add_on: AddOn,
    },
    DeleteAddOn {
        id: Ulid,
    },
    InsertQuestion {
        business_id: Ulid,
        question: Question,
    },
    DeleteQuestion {
        id: Ulid,
    },
    InsertBooking {
        request: BookingRequest,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectAvailability {
        business_id: Ulid,
        date: NaiveDate,
        duration: Option<Minutes>,
    },
    SelectBusinesses,
    SelectServices {
        business_id: Ulid,
    },
    SelectBookings {
        business_id: Ulid,
        date: Option<NaiveDate>,
    },
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
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "businesses" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("businesses", 1, 0));
            }
            Ok(Command::InsertBusiness {
                id: parse_ulid(&values[0])?,
                name: opt(&values, 1).map(parse_string_or_null).transpose()?.flatten(),
                buffer_minutes: opt(&values, 2).map(parse_i64_or_null).transpose()?.flatten(),
                min_notice_hours: opt(&values, 3).map(parse_i64_or_null).transpose()?.flatten(),
                slot_minutes: opt(&values, 4).map(parse_i64_or_null).transpose()?.flatten(),
            })
        }
        "hours" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("hours", 3, values.len()));
            }
            let business_id = parse_ulid(&values[0])?;
            let day_of_week = parse_weekday(&values[1])?;
            let hours = if parse_bool(&values[2])? {
                if values.len() < 5 {
                    return Err(SqlError::WrongArity("hours (open)", 5, values.len()));
                }
                DayHours::Open {
                    start: parse_hhmm(&values[3])?,
                    end: parse_hhmm(&values[4])?,
                }
            } else {
                DayHours::Closed
            };
            Ok(Command::InsertHours {
                business_id,
                day_of_week,
                hours,
            })
        }
        "services" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("services", 5, values.len()));
            }
            Ok(Command::InsertService {
                business_id: parse_ulid(&values[1])?,
                service: Service {
                    id: parse_ulid(&values[0])?,
                    name: parse_string(&values[2])?,
                    duration_minutes: parse_i64(&values[3])?,
                    price_cents: parse_i64(&values[4])?,
                },
            })
        }
        "options" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("options", 4, values.len()));
            }
            Ok(Command::InsertAddOn {
                business_id: parse_ulid(&values[1])?,
                add_on: AddOn {
                    id: parse_ulid(&values[0])?,
                    name: parse_string(&values[2])?,
                    price_cents: parse_i64(&values[3])?,
                },
            })
        }
        "questions" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("questions", 4, values.len()));
            }
            Ok(Command::InsertQuestion {
                business_id: parse_ulid(&values[1])?,
                question: Question {
                    id: parse_ulid(&values[0])?,
                    text: parse_string(&values[2])?,
                    required: parse_bool(&values[3])?,
                },
            })
        }
        "bookings" => {
            if values.len() < 8 {
                return Err(SqlError::WrongArity("bookings", 8, values.len()));
            }
            Ok(Command::InsertBooking {
                request: BookingRequest {
                    id: parse_ulid(&values[0])?,
                    business_id: parse_ulid(&values[1])?,
                    service_id: parse_ulid(&values[2])?,
                    contact: ContactInfo {
                        name: parse_string(&values[3])?,
                        email: parse_string(&values[4])?,
                        phone: parse_string_or_null(&values[5])?,
                    },
                    date: parse_date(&values[6])?,
                    start: parse_hhmm(&values[7])?,
                    add_on_ids: opt(&values, 8)
                        .map(parse_ulid_list)
                        .transpose()?
                        .unwrap_or_default(),
                    answers: opt(&values, 9)
                        .map(parse_answers_json)
                        .transpose()?
                        .unwrap_or_default(),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn opt<'a>(values: &'a [Expr], index: usize) -> Option<&'a Expr> {
    values.get(index)
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "businesses" => {
            let mut name = None;
            let mut buffer_minutes = None;
            let mut min_notice_hours = None;
            let mut slot_minutes = None;
            for assignment in assignments {
                let column = assignment_column(assignment)
                    .ok_or_else(|| SqlError::Parse("unsupported assignment target".into()))?;
                match column.as_str() {
                    "name" => name = Some(parse_string(&assignment.value)?),
                    "buffer_minutes" => buffer_minutes = Some(parse_i64(&assignment.value)?),
                    "min_notice_hours" => min_notice_hours = Some(parse_i64(&assignment.value)?),
                    "slot_minutes" => slot_minutes = Some(parse_i64(&assignment.value)?),
                    other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
                }
            }
            Ok(Command::UpdateBusiness {
                id,
                name,
                buffer_minutes,
                min_notice_hours,
                slot_minutes,
            })
        }
        "bookings" => {
            let mut status = None;
            for assignment in assignments {
                let column = assignment_column(assignment)
                    .ok_or_else(|| SqlError::Parse("unsupported assignment target".into()))?;
                match column.as_str() {
                    "status" => status = Some(parse_status(&assignment.value)?),
                    other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
                }
            }
            let status = status.ok_or(SqlError::MissingFilter("status"))?;
            Ok(Command::UpdateBookingStatus { id, status })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Option<String> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    if table == "hours" {
        let filters = extract_eq_filters(&delete.selection)?;
        let business_id = filters
            .iter()
            .find(|(c, _)| c == "business_id")
            .ok_or(SqlError::MissingFilter("business_id"))?;
        let day = filters
            .iter()
            .find(|(c, _)| c == "day_of_week")
            .ok_or(SqlError::MissingFilter("day_of_week"))?;
        return Ok(Command::DeleteHours {
            business_id: parse_ulid(&business_id.1)?,
            day_of_week: parse_weekday(&day.1)?,
        });
    }

    let id = extract_where_id(&delete.selection)?;
    match table.as_str() {
        "businesses" => Ok(Command::DeleteBusiness { id }),
        "services" => Ok(Command::DeleteService { id }),
        "options" => Ok(Command::DeleteAddOn { id }),
        "questions" => Ok(Command::DeleteQuestion { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = extract_eq_filters(&select.selection)?;
    let filter = |column: &str| filters.iter().find(|(c, _)| c == column).map(|(_, e)| e);

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            business_id: parse_ulid(
                filter("business_id").ok_or(SqlError::MissingFilter("business_id"))?,
            )?,
            date: parse_date(filter("date").ok_or(SqlError::MissingFilter("date"))?)?,
            duration: filter("duration").map(parse_i64).transpose()?,
        }),
        "businesses" => Ok(Command::SelectBusinesses),
        "services" => Ok(Command::SelectServices {
            business_id: parse_ulid(
                filter("business_id").ok_or(SqlError::MissingFilter("business_id"))?,
            )?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            business_id: parse_ulid(
                filter("business_id").ok_or(SqlError::MissingFilter("business_id"))?,
            )?,
            date: filter("date").map(parse_date).transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Collect `column = value` terms joined by AND.
fn extract_eq_filters(selection: &Option<Expr>) -> Result<Vec<(String, Expr)>, SqlError> {
    let mut filters = Vec::new();
    if let Some(expr) = selection {
        collect_eq(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_eq(expr: &Expr, filters: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq(left, filters)?;
                collect_eq(right, filters)?;
            }
            ast::BinaryOperator::Eq => {
                if let Some(column) = expr_column_name(left) {
                    filters.push((column, (**right).clone()));
                }
            }
            _ => {}
        },
        Expr::Nested(inner) => collect_eq(inner, filters)?,
        _ => {}
    }
    Ok(())
}

// ── Statement plumbing ────────────────────────────────────────

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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let filters = extract_eq_filters(selection)?;
    let (_, expr) = filters
        .iter()
        .find(|(c, _)| c == "id")
        .ok_or(SqlError::MissingFilter("id"))?;
    parse_ulid(expr)
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

// ── Value parsing ─────────────────────────────────────────────

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
                Ulid::from_string(s).map_err(|e| SqlError::BadValue(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::BadValue(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::BadValue(format!("bad integer: {e}"))),
            _ => Err(SqlError::BadValue(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_i64(expr)?)),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::BadValue(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_string(expr)?)),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::BadValue(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::BadValue(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_weekday(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v)
        .ok()
        .filter(|d| *d <= 6)
        .ok_or_else(|| SqlError::BadValue(format!("day_of_week must be 0-6, got {v}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|_| SqlError::BadValue(format!("bad date (expected YYYY-MM-DD): {s}")))
}

fn parse_hhmm(expr: &Expr) -> Result<Minutes, SqlError> {
    let s = parse_string(expr)?;
    hhmm_to_minutes(&s).ok_or_else(|| SqlError::BadValue(format!("bad time (expected HH:MM): {s}")))
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_string(expr)?;
    BookingStatus::parse(&s).ok_or_else(|| SqlError::BadValue(format!("bad status: {s}")))
}

/// `'01ARZ...,01BX...'` — comma-separated ULIDs, or NULL for none.
fn parse_ulid_list(expr: &Expr) -> Result<Vec<Ulid>, SqlError> {
    let Some(s) = parse_string_or_null(expr)? else {
        return Ok(Vec::new());
    };
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            Ulid::from_string(part).map_err(|e| SqlError::BadValue(format!("bad ULID: {e}")))
        })
        .collect()
}

/// `'{"<question id>": "<answer>"}'` — a JSON object, or NULL for none.
fn parse_answers_json(expr: &Expr) -> Result<Vec<(Ulid, String)>, SqlError> {
    let Some(s) = parse_string_or_null(expr)? else {
        return Ok(Vec::new());
    };
    let value: serde_json::Value = serde_json::from_str(&s)
        .map_err(|e| SqlError::BadValue(format!("bad answers JSON: {e}")))?;
    let serde_json::Value::Object(map) = value else {
        return Err(SqlError::BadValue("answers must be a JSON object".into()));
    };
    map.into_iter()
        .map(|(key, value)| {
            let question_id = Ulid::from_string(&key)
                .map_err(|e| SqlError::BadValue(format!("bad question id: {e}")))?;
            let answer = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(SqlError::BadValue(format!(
                        "answer must be a string or number, got {other}"
                    )))
                }
            };
            Ok((question_id, answer))
        })
        .collect()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    /// Statement parsed but a literal inside it is malformed (bad date,
    /// time, ULID, status). Distinct so the wire layer can signal a value
    /// error instead of a syntax error.
    BadValue(String),
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
            SqlError::BadValue(s) => write!(f, "bad value: {s}"),
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
