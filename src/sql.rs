use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::PoolKey;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One `VALUES` row of `INSERT INTO reservations`. Dates are kept raw so the
/// engine reports a backwards range as an invalid interval, not a parse error.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRow {
    pub id: Ulid,
    pub pool: PoolKey,
    pub quantity: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub quotation_id: Option<Ulid>,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProduct {
        id: Ulid,
        stock: u32,
        name: Option<String>,
    },
    InsertVariant {
        id: Ulid,
        product_id: Ulid,
        stock: u32,
        name: Option<String>,
    },
    SetStock {
        pool: PoolKey,
        stock: u32,
    },
    InsertReservation {
        order_id: Ulid,
        row: ReservationRow,
    },
    InsertOrder {
        order_id: Ulid,
        rows: Vec<ReservationRow>,
    },
    CancelOrder {
        order_id: Ulid,
    },
    CancelReservation {
        id: Ulid,
    },
    SelectAvailability {
        pool: PoolKey,
        start: NaiveDate,
        end: NaiveDate,
        quantity: u32,
    },
    SelectCalendar {
        pool: PoolKey,
        start: NaiveDate,
        end: NaiveDate,
    },
    SelectOrderReservations {
        order_id: Ulid,
    },
    SelectPoolReservations {
        pool: PoolKey,
    },
    SelectProducts,
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
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Column order of each writable table. Only the last column may be omitted.
const PRODUCT_COLUMNS: &[&str] = &["id", "stock", "name"];
const VARIANT_COLUMNS: &[&str] = &["id", "product_id", "stock", "name"];
const STOCK_LEVEL_COLUMNS: &[&str] = &["product_id", "variant_id", "stock"];
const RESERVATION_COLUMNS: &[&str] = &[
    "id",
    "order_id",
    "product_id",
    "variant_id",
    "quantity",
    "start_date",
    "end_date",
    "quotation_id",
];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "products" => {
            let values = single_row("products", PRODUCT_COLUMNS, &insert.columns, rows)?;
            if values.len() < 2 {
                return Err(SqlError::WrongArity("products", 2, values.len()));
            }
            Ok(Command::InsertProduct {
                id: parse_ulid(&values[0])?,
                stock: parse_u32(&values[1])?,
                name: optional(&values, 2, parse_string_or_null)?,
            })
        }
        "variants" => {
            let values = single_row("variants", VARIANT_COLUMNS, &insert.columns, rows)?;
            if values.len() < 3 {
                return Err(SqlError::WrongArity("variants", 3, values.len()));
            }
            Ok(Command::InsertVariant {
                id: parse_ulid(&values[0])?,
                product_id: parse_ulid(&values[1])?,
                stock: parse_u32(&values[2])?,
                name: optional(&values, 3, parse_string_or_null)?,
            })
        }
        "stock_levels" => {
            let values = single_row("stock_levels", STOCK_LEVEL_COLUMNS, &insert.columns, rows)?;
            if values.len() < 3 {
                return Err(SqlError::WrongArity("stock_levels", 3, values.len()));
            }
            Ok(Command::SetStock {
                pool: PoolKey::new(parse_ulid(&values[0])?, parse_ulid_or_null(&values[1])?),
                stock: parse_u32(&values[2])?,
            })
        }
        "reservations" => {
            let mut order_id = None;
            let mut parsed = Vec::with_capacity(rows.len());
            for (i, row) in rows.into_iter().enumerate() {
                let row = arrange_columns("reservations", RESERVATION_COLUMNS, &insert.columns, row)?;
                let (row_order, row) = parse_reservation_row(&row)
                    .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                match order_id {
                    None => order_id = Some(row_order),
                    Some(o) if o != row_order => return Err(SqlError::MixedOrders),
                    Some(_) => {}
                }
                parsed.push(row);
            }
            let order_id = order_id.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?;
            if parsed.len() == 1 {
                let row = parsed.remove(0);
                Ok(Command::InsertReservation { order_id, row })
            } else {
                Ok(Command::InsertOrder { order_id, rows: parsed })
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `(id, order_id, product_id, variant_id, quantity, start_date, end_date[, quotation_id])`
fn parse_reservation_row(values: &[Expr]) -> Result<(Ulid, ReservationRow), SqlError> {
    if values.len() < 7 {
        return Err(SqlError::WrongArity("reservations", 7, values.len()));
    }
    let order_id = parse_ulid(&values[1])?;
    let row = ReservationRow {
        id: parse_ulid(&values[0])?,
        pool: PoolKey::new(parse_ulid(&values[2])?, parse_ulid_or_null(&values[3])?),
        quantity: parse_u32(&values[4])?,
        start: parse_date(&values[5])?,
        end: parse_date(&values[6])?,
        quotation_id: optional(values, 7, parse_ulid_or_null)?,
    };
    Ok((order_id, row))
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut filters = Filters::default();
    if let Some(selection) = &delete.selection {
        collect_filters(selection, &mut filters)?;
    }
    match (filters.order_id, filters.id) {
        (Some(order_id), _) => Ok(Command::CancelOrder { order_id }),
        (None, Some(id)) => Ok(Command::CancelReservation { id }),
        (None, None) => Err(SqlError::MissingFilter("order_id")),
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

    let mut f = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut f)?;
    }

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            pool: f.pool()?,
            start: f.start_date.ok_or(SqlError::MissingFilter("start_date"))?,
            end: f.end_date.ok_or(SqlError::MissingFilter("end_date"))?,
            quantity: f.quantity.unwrap_or(1),
        }),
        "calendar" => Ok(Command::SelectCalendar {
            pool: f.pool()?,
            start: f.start_date.ok_or(SqlError::MissingFilter("start_date"))?,
            end: f.end_date.ok_or(SqlError::MissingFilter("end_date"))?,
        }),
        "reservations" => match f.order_id {
            Some(order_id) => Ok(Command::SelectOrderReservations { order_id }),
            None => Ok(Command::SelectPoolReservations { pool: f.pool()? }),
        },
        "products" => Ok(Command::SelectProducts),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Equality filters found in a WHERE clause of `AND`-ed `col = value` terms.
#[derive(Default)]
struct Filters {
    id: Option<Ulid>,
    order_id: Option<Ulid>,
    product_id: Option<Ulid>,
    variant_id: Option<Ulid>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    quantity: Option<u32>,
}

impl Filters {
    fn pool(&self) -> Result<PoolKey, SqlError> {
        let product_id = self.product_id.ok_or(SqlError::MissingFilter("product_id"))?;
        Ok(PoolKey::new(product_id, self.variant_id))
    }
}

fn collect_filters(expr: &Expr, f: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, f),
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_filters(left, f)?;
            collect_filters(right, f)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            match expr_column_name(left).as_deref() {
                Some("id") => f.id = Some(parse_ulid(right)?),
                Some("order_id") => f.order_id = Some(parse_ulid(right)?),
                Some("product_id") => f.product_id = Some(parse_ulid(right)?),
                Some("variant_id") => f.variant_id = parse_ulid_or_null(right)?,
                Some("start_date") => f.start_date = Some(parse_date(right)?),
                Some("end_date") => f.end_date = Some(parse_date(right)?),
                Some("quantity") => f.quantity = Some(parse_u32(right)?),
                _ => {}
            }
            Ok(())
        }
        _ => Ok(()),
    }
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

/// Every `VALUES` row; never empty.
fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Catalog tables take one row per statement.
fn single_row(
    table: &'static str,
    canonical: &[&'static str],
    columns: &[ast::Ident],
    mut rows: Vec<Vec<Expr>>,
) -> Result<Vec<Expr>, SqlError> {
    if rows.len() != 1 {
        return Err(SqlError::MultiRow(table, rows.len()));
    }
    arrange_columns(table, canonical, columns, rows.remove(0))
}

/// Reorder `row` from the statement's column list into `canonical` order.
/// Without a column list the values are already positional.
fn arrange_columns(
    table: &'static str,
    canonical: &[&'static str],
    columns: &[ast::Ident],
    row: Vec<Expr>,
) -> Result<Vec<Expr>, SqlError> {
    if columns.is_empty() {
        return Ok(row);
    }
    if columns.len() != row.len() {
        return Err(SqlError::WrongArity(table, columns.len(), row.len()));
    }

    let mut slots: Vec<Option<Expr>> = vec![None; canonical.len()];
    for (ident, value) in columns.iter().zip(row) {
        let name = ident.value.to_lowercase();
        let pos = canonical
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| SqlError::UnknownColumn(table, name.clone()))?;
        if slots[pos].replace(value).is_some() {
            return Err(SqlError::DuplicateColumn(table, name));
        }
    }

    let present = slots.iter().take_while(|s| s.is_some()).count();
    let required = canonical.len() - 1;
    if present < required {
        return Err(SqlError::MissingColumn(table, canonical[present]));
    }
    Ok(slots.into_iter().flatten().collect())
}

fn optional<T>(
    values: &[Expr],
    index: usize,
    parse: fn(&Expr) -> Result<Option<T>, SqlError>,
) -> Result<Option<T>, SqlError> {
    match values.get(index) {
        Some(expr) => parse(expr),
        None => Ok(None),
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
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string or NULL, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let raw = match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => s,
        Some(value) => return Err(SqlError::Parse(format!("expected date, got {value:?}"))),
        None => return Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    };
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| SqlError::Parse(format!("bad date '{raw}': {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let raw = match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s,
        Some(value) => return Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => return Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    };
    raw.parse()
        .map_err(|_| SqlError::Parse(format!("{raw} is not a non-negative integer")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("all rows of one INSERT must share an order_id")]
    MixedOrders,
    #[error("{0}: expected one VALUES row, got {1}")]
    MultiRow(&'static str, usize),
    #[error("{0}: unknown column {1}")]
    UnknownColumn(&'static str, String),
    #[error("{0}: column {1} listed twice")]
    DuplicateColumn(&'static str, String),
    #[error("{0}: missing column {1}")]
    MissingColumn(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const V: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const O: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn parse_insert_product() {
        let cmd = parse_sql(&format!("INSERT INTO products (id, stock) VALUES ('{P}', 3)")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertProduct { id: ulid(P), stock: 3, name: None }
        );
    }

    #[test]
    fn parse_insert_product_with_name() {
        let sql = format!("INSERT INTO products (id, stock, name) VALUES ('{P}', 2, 'Canoe')");
        match parse_sql(&sql).unwrap() {
            Command::InsertProduct { name, .. } => assert_eq!(name.as_deref(), Some("Canoe")),
            cmd => panic!("expected InsertProduct, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_variant() {
        let sql = format!("INSERT INTO variants (id, product_id, stock) VALUES ('{V}', '{P}', 1)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertVariant { id: ulid(V), product_id: ulid(P), stock: 1, name: None }
        );
    }

    #[test]
    fn parse_set_stock_base_pool() {
        let sql = format!("INSERT INTO stock_levels (product_id, variant_id, stock) VALUES ('{P}', NULL, 7)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SetStock { pool: PoolKey::product(ulid(P)), stock: 7 }
        );
    }

    #[test]
    fn parse_single_reservation() {
        let sql = format!(
            "INSERT INTO reservations (id, order_id, product_id, variant_id, quantity, start_date, end_date) \
             VALUES ('{V}', '{O}', '{P}', NULL, 2, '2025-03-01', '2025-03-04')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { order_id, row } => {
                assert_eq!(order_id, ulid(O));
                assert_eq!(row.id, ulid(V));
                assert_eq!(row.pool, PoolKey::product(ulid(P)));
                assert_eq!(row.quantity, 2);
                assert_eq!(row.start, date("2025-03-01"));
                assert_eq!(row.end, date("2025-03-04"));
                assert_eq!(row.quotation_id, None);
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_multi_row_reservation_is_one_order() {
        let r1 = Ulid::new();
        let r2 = Ulid::new();
        let q = Ulid::new();
        let sql = format!(
            "INSERT INTO reservations (id, order_id, product_id, variant_id, quantity, start_date, end_date, quotation_id) VALUES \
             ('{r1}', '{O}', '{P}', NULL, 1, '2025-03-01', '2025-03-04', NULL), \
             ('{r2}', '{O}', '{P}', '{V}', 1, '2025-03-02', '2025-03-05', '{q}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertOrder { order_id, rows } => {
                assert_eq!(order_id, ulid(O));
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[1].pool, PoolKey::variant(ulid(P), ulid(V)));
                assert_eq!(rows[1].quotation_id, Some(q));
            }
            cmd => panic!("expected InsertOrder, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_rows_of_different_orders_rejected() {
        let sql = format!(
            "INSERT INTO reservations VALUES \
             ('{}', '{O}', '{P}', NULL, 1, '2025-03-01', '2025-03-04'), \
             ('{}', '{}', '{P}', NULL, 1, '2025-03-01', '2025-03-04')",
            Ulid::new(),
            Ulid::new(),
            Ulid::new()
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::MixedOrders)));
    }

    #[test]
    fn parse_backwards_dates_still_parse() {
        let sql = format!(
            "INSERT INTO reservations VALUES ('{V}', '{O}', '{P}', NULL, 1, '2025-03-04', '2025-03-01')"
        );
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertReservation { .. }));
    }

    #[test]
    fn parse_bad_date_errors() {
        let sql = format!(
            "INSERT INTO reservations VALUES ('{V}', '{O}', '{P}', NULL, 1, '2025-13-01', '2025-03-01')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn catalog_inserts_take_one_row() {
        let products = format!("INSERT INTO products (id, stock) VALUES ('{P}', 1), ('{V}', 2)");
        assert!(matches!(parse_sql(&products), Err(SqlError::MultiRow("products", 2))));

        let variants = format!(
            "INSERT INTO variants (id, product_id, stock) VALUES ('{V}', '{P}', 1), ('{O}', '{P}', 1)"
        );
        assert!(matches!(parse_sql(&variants), Err(SqlError::MultiRow("variants", 2))));

        let stock = format!(
            "INSERT INTO stock_levels (product_id, variant_id, stock) VALUES ('{P}', NULL, 1), ('{P}', '{V}', 2)"
        );
        assert!(matches!(parse_sql(&stock), Err(SqlError::MultiRow("stock_levels", 2))));
    }

    #[test]
    fn column_list_reorders_values() {
        let sql = format!("INSERT INTO products (name, stock, id) VALUES ('Canoe', 4, '{P}')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertProduct { id: ulid(P), stock: 4, name: Some("Canoe".into()) }
        );

        let sql = format!(
            "INSERT INTO variants (product_id, id, stock) VALUES ('{P}', '{V}', 1)"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertVariant { id: ulid(V), product_id: ulid(P), stock: 1, name: None }
        );

        let sql = format!(
            "INSERT INTO reservations (order_id, id, start_date, end_date, quantity, product_id, variant_id)              VALUES ('{O}', '{V}', '2025-03-01', '2025-03-04', 2, '{P}', NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { order_id, row } => {
                assert_eq!(order_id, ulid(O));
                assert_eq!(row.id, ulid(V));
                assert_eq!(row.quantity, 2);
                assert_eq!(row.start, date("2025-03-01"));
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn column_list_must_name_known_columns() {
        let unknown = format!("INSERT INTO products (id, amount) VALUES ('{P}', 1)");
        assert!(matches!(
            parse_sql(&unknown),
            Err(SqlError::UnknownColumn("products", c)) if c == "amount"
        ));

        let missing = format!("INSERT INTO products (id, name) VALUES ('{P}', 'Canoe')");
        assert!(matches!(
            parse_sql(&missing),
            Err(SqlError::MissingColumn("products", "stock"))
        ));

        let twice = format!("INSERT INTO products (id, id, stock) VALUES ('{P}', '{V}', 1)");
        assert!(matches!(parse_sql(&twice), Err(SqlError::DuplicateColumn("products", _))));

        let short = format!("INSERT INTO products (id, stock, name) VALUES ('{P}', 1)");
        assert!(matches!(parse_sql(&short), Err(SqlError::WrongArity("products", 3, 2))));
    }

    #[test]
    fn parse_cancel_order() {
        let sql = format!("DELETE FROM reservations WHERE order_id = '{O}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::CancelOrder { order_id: ulid(O) });
    }

    #[test]
    fn parse_cancel_reservation() {
        let sql = format!("DELETE FROM reservations WHERE id = '{V}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::CancelReservation { id: ulid(V) });
    }

    #[test]
    fn parse_delete_without_filter_errors() {
        assert!(matches!(
            parse_sql("DELETE FROM reservations"),
            Err(SqlError::MissingFilter("order_id"))
        ));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE product_id = '{P}' AND start_date = '2025-01-06' \
             AND end_date = '2025-01-08' AND quantity = 2"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                pool: PoolKey::product(ulid(P)),
                start: date("2025-01-06"),
                end: date("2025-01-08"),
                quantity: 2,
            }
        );
    }

    #[test]
    fn parse_select_availability_defaults_to_one_unit() {
        let sql = format!(
            "SELECT * FROM availability WHERE product_id = '{P}' AND variant_id = '{V}' \
             AND start_date = '2025-01-06' AND end_date = '2025-01-08'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { pool, quantity, .. } => {
                assert_eq!(pool, PoolKey::variant(ulid(P), ulid(V)));
                assert_eq!(quantity, 1);
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_requires_dates() {
        let sql = format!("SELECT * FROM availability WHERE product_id = '{P}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("start_date"))
        ));
    }

    #[test]
    fn parse_select_calendar() {
        let sql = format!(
            "SELECT * FROM calendar WHERE product_id = '{P}' AND start_date = '2025-01-01' AND end_date = '2025-02-01'"
        );
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectCalendar { .. }));
    }

    #[test]
    fn parse_select_reservations() {
        let by_order = format!("SELECT * FROM reservations WHERE order_id = '{O}'");
        assert_eq!(
            parse_sql(&by_order).unwrap(),
            Command::SelectOrderReservations { order_id: ulid(O) }
        );
        let by_pool = format!("SELECT * FROM reservations WHERE product_id = '{P}'");
        assert_eq!(
            parse_sql(&by_pool).unwrap(),
            Command::SelectPoolReservations { pool: PoolKey::product(ulid(P)) }
        );
    }

    #[test]
    fn parse_select_products() {
        assert_eq!(parse_sql("SELECT * FROM products").unwrap(), Command::SelectProducts);
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO bookings (id) VALUES ('{P}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
