//! HTTP route table and handlers.
//!
//! Every response is `200 OK` with a plain-text body. Writes answer
//! `SUCCESS`, `OPERATION ERROR` or `INVALID DATA`; reads answer their value
//! or `OPERATION ERROR`. Lists are comma-separated in ascending order and
//! the empty set is an empty body.

use crate::adapters::{Reply, Translator};
use crate::core::error::{
    AdapterErrorMapping, BasaltError, BasaltResult, HttpErrorMapping, HTTP_SUCCESS,
};
use crate::replica::{OpKind, Operation, QueryResult};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

type Shared = State<Arc<Translator>>;

/// Build the router over a shared translator.
pub fn router(translator: Arc<Translator>) -> Router {
    Router::new()
        .route("/add/{name}/{value}", post(add))
        .route("/addmany/{name}/{values}", post(add_many))
        .route("/remove/{name}/{value}", post(remove))
        .route("/drop/{name}", post(drop_bitmap))
        .route("/clear/{name}", post(clear))
        .route("/exists/{name}/{value}", get(exists))
        .route("/card/{name}", get(card))
        .route("/inter/{names}", get(inter))
        .route("/interstore/{dst}/{names}", get(inter_store))
        .route("/union/{names}", get(union))
        .route("/unionstore/{dst}/{names}", get(union_store))
        .route("/xor/{name1}/{name2}", get(xor))
        .route("/xorstore/{dst}/{name1}/{name2}", get(xor_store))
        .route("/diff/{name1}/{name2}", get(diff))
        .route("/diffstore/{dst}/{name1}/{name2}", get(diff_store))
        .with_state(translator)
}

/// Parse a base-10 `u32` path segment. Signs and whitespace are rejected.
pub fn parse_value(segment: &str) -> BasaltResult<u32> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BasaltError::invalid_data(format!("not a number: {:?}", segment)));
    }
    segment
        .parse()
        .map_err(|_| BasaltError::invalid_data(format!("out of range: {}", segment)))
}

/// Parse a comma-separated list of values.
pub fn parse_values(csv: &str) -> BasaltResult<Vec<u32>> {
    csv.split(',').map(parse_value).collect()
}

fn split_names(csv: &str) -> Vec<String> {
    csv.split(',').map(str::to_string).collect()
}

fn join_values(values: &[u32]) -> String {
    values
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

async fn run(translator: &Translator, op: BasaltResult<Operation>) -> BasaltResult<Reply> {
    let command = op?.into_command()?;
    translator.execute(&command).await
}

async fn write(translator: &Translator, op: BasaltResult<Operation>) -> String {
    match run(translator, op).await {
        Ok(_) => HTTP_SUCCESS.to_string(),
        Err(e) => HttpErrorMapping::map_error(&e).to_string(),
    }
}

async fn read<F>(translator: &Translator, op: BasaltResult<Operation>, render: F) -> String
where
    F: FnOnce(QueryResult) -> BasaltResult<String>,
{
    let rendered = match run(translator, op).await {
        Ok(reply) => reply.into_result().and_then(render),
        Err(e) => Err(e),
    };
    rendered.unwrap_or_else(|e| HttpErrorMapping::map_error(&e).to_string())
}

fn render_list(result: QueryResult) -> BasaltResult<String> {
    result.into_values().map(|v| join_values(&v))
}

fn single(kind: OpKind, name: String, values: Vec<u32>) -> Operation {
    Operation::new(kind, vec![name], values)
}

fn with_destination(kind: OpKind, dst: String, names: Vec<String>) -> Operation {
    let mut targets = Vec::with_capacity(names.len() + 1);
    targets.push(dst);
    targets.extend(names);
    Operation::new(kind, targets, Vec::new())
}

async fn add(State(t): Shared, Path((name, value)): Path<(String, String)>) -> String {
    let op = parse_value(&value).map(|v| single(OpKind::Add, name, vec![v]));
    write(&t, op).await
}

async fn add_many(State(t): Shared, Path((name, values)): Path<(String, String)>) -> String {
    let op = parse_values(&values).map(|v| single(OpKind::AddMany, name, v));
    write(&t, op).await
}

async fn remove(State(t): Shared, Path((name, value)): Path<(String, String)>) -> String {
    let op = parse_value(&value).map(|v| single(OpKind::Remove, name, vec![v]));
    write(&t, op).await
}

async fn drop_bitmap(State(t): Shared, Path(name): Path<String>) -> String {
    write(&t, Ok(single(OpKind::Drop, name, Vec::new()))).await
}

async fn clear(State(t): Shared, Path(name): Path<String>) -> String {
    write(&t, Ok(single(OpKind::Clear, name, Vec::new()))).await
}

async fn exists(State(t): Shared, Path((name, value)): Path<(String, String)>) -> String {
    let op = parse_value(&value).map(|v| single(OpKind::Exists, name, vec![v]));
    read(&t, op, |r| r.into_bool().map(|b| b.to_string())).await
}

async fn card(State(t): Shared, Path(name): Path<String>) -> String {
    let op = Ok(single(OpKind::Card, name, Vec::new()));
    read(&t, op, |r| r.into_count().map(|n| n.to_string())).await
}

async fn inter(State(t): Shared, Path(names): Path<String>) -> String {
    let op = Ok(Operation::new(OpKind::Inter, split_names(&names), Vec::new()));
    read(&t, op, render_list).await
}

async fn union(State(t): Shared, Path(names): Path<String>) -> String {
    let op = Ok(Operation::new(OpKind::Union, split_names(&names), Vec::new()));
    read(&t, op, render_list).await
}

async fn inter_store(State(t): Shared, Path((dst, names)): Path<(String, String)>) -> String {
    let op = with_destination(OpKind::InterStore, dst, split_names(&names));
    write(&t, Ok(op)).await
}

async fn union_store(State(t): Shared, Path((dst, names)): Path<(String, String)>) -> String {
    let op = with_destination(OpKind::UnionStore, dst, split_names(&names));
    write(&t, Ok(op)).await
}

async fn xor(State(t): Shared, Path((name1, name2)): Path<(String, String)>) -> String {
    let op = Ok(Operation::new(OpKind::Xor, vec![name1, name2], Vec::new()));
    read(&t, op, render_list).await
}

async fn diff(State(t): Shared, Path((name1, name2)): Path<(String, String)>) -> String {
    let op = Ok(Operation::new(OpKind::Diff, vec![name1, name2], Vec::new()));
    read(&t, op, render_list).await
}

async fn xor_store(
    State(t): Shared,
    Path((dst, name1, name2)): Path<(String, String, String)>,
) -> String {
    let op = with_destination(OpKind::XorStore, dst, vec![name1, name2]);
    write(&t, Ok(op)).await
}

async fn diff_store(
    State(t): Shared,
    Path((dst, name1, name2)): Path<(String, String, String)>,
) -> String {
    let op = with_destination(OpKind::DiffStore, dst, vec![name1, name2]);
    write(&t, Ok(op)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("0").unwrap(), 0);
        assert_eq!(parse_value("4294967295").unwrap(), u32::MAX);
        for bad in ["", "abc", "-1", "+1", " 1", "4294967296", "1.5"] {
            assert!(
                matches!(parse_value(bad), Err(BasaltError::InvalidData { .. })),
                "{:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(parse_values("3,1,3").unwrap(), vec![3, 1, 3]);
        assert!(parse_values("1,,2").is_err());
        assert!(parse_values("1,x").is_err());
    }

    #[test]
    fn test_join_values() {
        assert_eq!(join_values(&[]), "");
        assert_eq!(join_values(&[1, 20, 300]), "1,20,300");
    }
}
