use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub mod wire;

use wire::{BatchPart, EmbeddedRequest, EmbeddedResponse, PartResponse};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Price", default)]
    pub price: f64,
}

#[derive(Deserialize)]
pub struct CreateProduct {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Price", default)]
    pub price: f64,
}

#[derive(Deserialize)]
pub struct UpdateProduct {
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Price")]
    pub price: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct Catalog {
    products: BTreeMap<u32, Product>,
    next_id: u32,
}

pub type Db = Arc<RwLock<Catalog>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Catalog::default()));
    Router::new()
        .route("/odata/Products", get(list_products))
        .route("/odata/$batch", post(batch))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_products(State(db): State<Db>) -> Json<Value> {
    let catalog = db.read().await;
    let results: Vec<&Product> = catalog.products.values().collect();
    Json(json!({ "d": { "results": results } }))
}

async fn batch(State(db): State<Db>, headers: HeaderMap, body: String) -> Response {
    let Some(boundary) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(wire::boundary_of)
    else {
        return (StatusCode::BAD_REQUEST, "missing multipart boundary").into_response();
    };
    let parts = match wire::parse_batch(&body, &boundary) {
        Ok(parts) => parts,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };
    tracing::debug!(parts = parts.len(), "executing batch");

    let mut catalog = db.write().await;
    let replies: Vec<PartResponse> = parts
        .into_iter()
        .map(|part| match part {
            BatchPart::Request(request) => PartResponse::Single(catalog.execute(&request)),
            BatchPart::ChangeSet(requests) => catalog.execute_change_set(&requests),
        })
        .collect();

    let reply_boundary = format!("batchresponse_{}", Uuid::new_v4());
    (
        StatusCode::ACCEPTED,
        [(
            header::CONTENT_TYPE,
            format!("multipart/mixed; boundary={reply_boundary}"),
        )],
        wire::write_batch(&replies, &reply_boundary),
    )
        .into_response()
}

impl Catalog {
    /// Run every request on a copy; keep the copy only if all succeeded.
    fn execute_change_set(&mut self, requests: &[EmbeddedRequest]) -> PartResponse {
        let mut draft = self.clone();
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            let response = draft.execute(request);
            if response.status >= 400 {
                return PartResponse::Single(response);
            }
            responses.push(response);
        }
        *self = draft;
        PartResponse::ChangeSet(responses)
    }

    fn execute(&mut self, request: &EmbeddedRequest) -> EmbeddedResponse {
        let (path, query) = request.url.split_once('?').unwrap_or((request.url.as_str(), ""));
        let mut response = match (request.method.as_str(), parse_path(path)) {
            ("GET", Some(Target::Collection)) => self.list(query),
            ("GET", Some(Target::Count)) => text(200, self.products.len().to_string()),
            ("GET", Some(Target::Entity(id))) => self.get(id),
            ("GET", Some(Target::NameValue(id))) => match self.products.get(&id) {
                Some(product) => text(200, product.name.clone()),
                None => not_found(id),
            },
            ("POST", Some(Target::Collection)) => self.create(&request.body),
            ("PUT" | "MERGE" | "PATCH", Some(Target::Entity(id))) => self.update(id, &request.body),
            ("DELETE", Some(Target::Entity(id))) => match self.products.remove(&id) {
                Some(_) => empty(204),
                None => not_found(id),
            },
            (_, None) => error(404, format!("Resource not found for segment '{path}'")),
            (method, Some(_)) => error(405, format!("Method {method} not allowed")),
        };
        response.content_id = request.content_id.clone();
        response
    }

    fn list(&self, query: &str) -> EmbeddedResponse {
        let top = query
            .split('&')
            .find_map(|p| p.strip_prefix("$top="))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(usize::MAX);
        let results: Vec<&Product> = self.products.values().take(top).collect();
        entity_json(200, json!({ "d": { "results": results } }))
    }

    fn get(&self, id: u32) -> EmbeddedResponse {
        match self.products.get(&id) {
            Some(product) => entity_json(200, json!({ "d": product })),
            None => not_found(id),
        }
    }

    fn create(&mut self, body: &str) -> EmbeddedResponse {
        let input: CreateProduct = match serde_json::from_str(body) {
            Ok(input) => input,
            Err(e) => return error(400, format!("Invalid payload: {e}")),
        };
        self.next_id += 1;
        let product = Product {
            id: self.next_id,
            name: input.name,
            price: input.price,
        };
        self.products.insert(product.id, product.clone());
        entity_json(201, json!({ "d": product }))
    }

    fn update(&mut self, id: u32, body: &str) -> EmbeddedResponse {
        let input: UpdateProduct = match serde_json::from_str(body) {
            Ok(input) => input,
            Err(e) => return error(400, format!("Invalid payload: {e}")),
        };
        let Some(product) = self.products.get_mut(&id) else {
            return not_found(id);
        };
        if let Some(name) = input.name {
            product.name = name;
        }
        if let Some(price) = input.price {
            product.price = price;
        }
        empty(204)
    }
}

enum Target {
    Collection,
    Count,
    Entity(u32),
    NameValue(u32),
}

fn parse_path(path: &str) -> Option<Target> {
    let path = path.trim_start_matches('/');
    match path {
        "Products" => return Some(Target::Collection),
        "Products/$count" => return Some(Target::Count),
        _ => {}
    }
    let rest = path.strip_prefix("Products(")?;
    let (id, tail) = rest.split_once(')')?;
    let id = id.parse().ok()?;
    match tail {
        "" => Some(Target::Entity(id)),
        "/Name/$value" => Some(Target::NameValue(id)),
        _ => None,
    }
}

fn entity_json(status: u16, value: Value) -> EmbeddedResponse {
    EmbeddedResponse {
        content_id: None,
        status,
        content_type: Some("application/json"),
        body: value.to_string(),
    }
}

fn text(status: u16, body: String) -> EmbeddedResponse {
    EmbeddedResponse {
        content_id: None,
        status,
        content_type: Some("text/plain"),
        body,
    }
}

fn empty(status: u16) -> EmbeddedResponse {
    EmbeddedResponse {
        content_id: None,
        status,
        content_type: None,
        body: String::new(),
    }
}

fn error(status: u16, message: String) -> EmbeddedResponse {
    entity_json(
        status,
        json!({ "error": { "code": status.to_string(), "message": { "lang": "en", "value": message } } }),
    )
}

fn not_found(id: u32) -> EmbeddedResponse {
    error(404, format!("Product {id} does not exist"))
}
