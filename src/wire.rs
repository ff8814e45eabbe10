use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::RentdAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ReservationRow};

pub struct RentdHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RentdQueryParser>,
}

impl RentdHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RentdQueryParser),
        }
    }

    /// Run one command, recording its latency and outcome.
    async fn run(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertProduct { id, stock, name } => {
                engine
                    .register_product(id, name, stock)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertVariant {
                id,
                product_id,
                stock,
                name,
            } => {
                engine
                    .register_variant(id, product_id, name, stock)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SetStock { pool, stock } => {
                engine
                    .set_stock(pool.product_id, pool.variant_id, stock)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertReservation { order_id, row } => {
                let line = row_to_line(row).map_err(engine_err)?;
                engine
                    .reserve_line(order_id, line)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertOrder { order_id, rows } => {
                let lines = rows
                    .into_iter()
                    .map(row_to_line)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(engine_err)?;
                let ids = engine
                    .create_order_reservations(order_id, lines)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(ids.len()))])
            }
            Command::CancelOrder { order_id } => {
                let n = engine
                    .cancel_order_reservations(order_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(n))])
            }
            Command::CancelReservation { id } => {
                engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectAvailability {
                pool,
                start,
                end,
                quantity,
            } => {
                let a = engine
                    .check_availability(pool.product_id, pool.variant_id, start, end, quantity)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&pool.product_id.to_string())?;
                encoder.encode_field(&pool.variant_id.map(|v| v.to_string()))?;
                encoder.encode_field(&start.to_string())?;
                encoder.encode_field(&end.to_string())?;
                encoder.encode_field(&i64::from(quantity))?;
                encoder.encode_field(&a.available)?;
                encoder.encode_field(&i64::from(a.available_quantity))?;
                encoder.encode_field(&a.message)?;
                Ok(vec![query_response(schema, vec![Ok(encoder.take_row())])])
            }
            Command::SelectCalendar { pool, start, end } => {
                let days = engine
                    .availability_calendar(pool.product_id, pool.variant_id, start, end)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(calendar_schema());
                let rows = days
                    .into_iter()
                    .map(|d| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&d.date.to_string())?;
                        encoder.encode_field(&i64::from(d.reserved))?;
                        encoder.encode_field(&i64::from(d.free))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectOrderReservations { order_id } => {
                let reservations = engine.order_reservations(order_id).await;
                Ok(vec![reservations_response(reservations)])
            }
            Command::SelectPoolReservations { pool } => {
                let reservations = engine
                    .pool_reservations(pool.product_id, pool.variant_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![reservations_response(reservations)])
            }
            Command::SelectProducts => {
                let stock = engine.list_stock().await;
                let schema = Arc::new(products_schema());
                let rows = stock
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.pool.product_id.to_string())?;
                        encoder.encode_field(&s.pool.variant_id.map(|v| v.to_string()))?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&i64::from(s.stock))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
        }
    }
}

/// A backwards range is reported here, before an `OrderLine` exists.
fn row_to_line(row: ReservationRow) -> Result<OrderLine, EngineError> {
    if row.start >= row.end {
        return Err(EngineError::InvalidInterval {
            start: row.start,
            end: row.end,
        });
    }
    let range = DateRange::new(row.start, row.end);
    let mut line = match row.quotation_id {
        Some(qid) => OrderLine::quotation(qid, row.pool, row.quantity, range),
        None => OrderLine::direct(row.pool, row.quantity, range),
    };
    line.id = row.id;
    Ok(line)
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn reservations_response(reservations: Vec<Reservation>) -> Response {
    let schema = Arc::new(reservations_schema());
    let rows = reservations
        .into_iter()
        .map(|r| {
            let quotation_id = match r.source {
                LineSource::Quotation { quotation_id } => Some(quotation_id.to_string()),
                LineSource::Direct => None,
            };
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.order_id.to_string())?;
            encoder.encode_field(&r.pool.product_id.to_string())?;
            encoder.encode_field(&r.pool.variant_id.map(|v| v.to_string()))?;
            encoder.encode_field(&i64::from(r.quantity))?;
            encoder.encode_field(&r.range.start.to_string())?;
            encoder.encode_field(&r.range.end.to_string())?;
            encoder.encode_field(&r.status.as_str().to_string())?;
            encoder.encode_field(&quotation_id)?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("product_id", Type::VARCHAR),
        field("variant_id", Type::VARCHAR),
        field("start_date", Type::VARCHAR),
        field("end_date", Type::VARCHAR),
        field("quantity", Type::INT8),
        field("available", Type::BOOL),
        field("available_quantity", Type::INT8),
        field("message", Type::VARCHAR),
    ]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("reserved", Type::INT8),
        field("free", Type::INT8),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("order_id", Type::VARCHAR),
        field("product_id", Type::VARCHAR),
        field("variant_id", Type::VARCHAR),
        field("quantity", Type::INT8),
        field("start_date", Type::VARCHAR),
        field("end_date", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("quotation_id", Type::VARCHAR),
    ]
}

fn products_schema() -> Vec<FieldInfo> {
    vec![
        field("product_id", Type::VARCHAR),
        field("variant_id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("stock", Type::INT8),
    ]
}

/// Row shape of a statement, judged from the table it selects from.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if !lower.trim_start().starts_with("select") {
        return vec![];
    }
    if lower.contains("from availability") {
        availability_schema()
    } else if lower.contains("from calendar") {
        calendar_schema()
    } else if lower.contains("from reservations") {
        reservations_schema()
    } else if lower.contains("from products") {
        products_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RentdHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run(cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RentdQueryParser;

#[async_trait]
impl QueryParser for RentdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RentdHandler {
    type Statement = String;
    type QueryParser = RentdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run(cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Replaces from the highest index down so `$1` never clobbers `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RentdFactory {
    handler: Arc<RentdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<RentdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RentdFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = RentdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RentdHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RentdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(RentdFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict { .. } => "40001",
        EngineError::NotFound(_) => "P0002",
        EngineError::InvalidInterval { .. } | EngineError::InvalidQuantity(_) => "22023",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::StockBelowCommitted { .. } => "23514",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Storage(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if !e.is_retryable() {
        tracing::debug!("engine rejected command: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
