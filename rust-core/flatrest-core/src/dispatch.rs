//! # CRUD Dispatcher
//!
//! Maps (target, method, payload) onto one store operation and a response.
//!
//! | target     | method | outcome                                          |
//! |------------|--------|--------------------------------------------------|
//! | collection | GET    | 200 all records                                  |
//! | collection | POST   | 201 created record, or 400                       |
//! | item       | GET    | 200 record, or 404 "`<name> <id>` not found"     |
//! | item       | PUT    | 204, 404 (no body), or 400                       |
//! | item       | DELETE | 202, or 404 "`<name> <id>` not found"            |
//! | invalid id | any    | 404 (no body)                                    |
//! | otherwise  |        | 501 "`<METHOD>` method not supported by this service." |
//!
//! The dispatcher holds no per-request state. A store is opened fresh for
//! every request and dropped when the response is built.

use crate::error::Result;
use crate::json::to_json;
use crate::request::{ApiRequest, Payload};
use crate::response::ApiResponse;
use crate::router::{Method, Registry, ResourceType, Target};
use crate::store::{record_id, Record, StoreFactory, ID_FIELD};
use crate::validation::{FieldError, ValidationResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// Body of every store failure response
const STORAGE_FAILURE: &str = "Internal storage error";

/// Generic CRUD request handler over a [`Registry`] of resources
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    stores: Arc<dyn StoreFactory>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher over `registry`, persisting through `stores`
    pub fn new(registry: Registry, stores: Arc<dyn StoreFactory>) -> Self {
        Self {
            registry: Arc::new(registry),
            stores,
        }
    }

    /// The resources this dispatcher serves
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle a request, answering 404 when no resource claims its path
    pub fn handle(&self, request: &ApiRequest) -> ApiResponse {
        self.try_handle(request)
            .unwrap_or_else(|| ApiResponse::empty(404))
    }

    /// Handle a request if a registered resource claims its path
    pub fn try_handle(&self, request: &ApiRequest) -> Option<ApiResponse> {
        let (resource, target) = self.registry.resolve(&request.path)?;
        debug!(resource = %resource.name, ?target, method = %request.method, "Dispatching");

        let response = match target {
            Target::InvalidId(_) => Ok(ApiResponse::empty(404)),
            Target::Collection => self.collection(resource, request),
            Target::Item(id) => self.item(resource, id, request),
        };

        Some(response.unwrap_or_else(|e| {
            error!(collection = %resource.collection, error = %e, "Store operation failed");
            ApiResponse::text(500, STORAGE_FAILURE)
        }))
    }

    fn collection(&self, resource: &ResourceType, request: &ApiRequest) -> Result<ApiResponse> {
        match request.method {
            Method::Get => {
                let store = self.stores.open(&resource.collection)?;
                Ok(ApiResponse::json(200, to_json(&store.get_all())?))
            }
            Method::Post => {
                let fields = match validated_payload(resource, request) {
                    Ok(fields) => fields,
                    Err(rejection) => return Ok(rejection.into()),
                };
                let mut store = self.stores.open(&resource.collection)?;
                let created = store.add(fields)?;
                Ok(ApiResponse::json(201, to_json(&created)?))
            }
            ref other => Ok(not_supported(other)),
        }
    }

    fn item(&self, resource: &ResourceType, id: i64, request: &ApiRequest) -> Result<ApiResponse> {
        match request.method {
            Method::Get => {
                let store = self.stores.open(&resource.collection)?;
                match store.get(id) {
                    Some(record) => Ok(ApiResponse::json(200, to_json(&record)?)),
                    None => Ok(not_found(resource, id)),
                }
            }
            Method::Put => {
                let mut fields = match validated_payload(resource, request) {
                    Ok(fields) => fields,
                    Err(rejection) => return Ok(rejection.into()),
                };
                if let Err(mismatch) = claim_id(&mut fields, id) {
                    return Ok(ApiResponse::text(400, mismatch.message));
                }
                let mut store = self.stores.open(&resource.collection)?;
                if store.update(fields)? {
                    Ok(ApiResponse::empty(204))
                } else {
                    Ok(ApiResponse::empty(404))
                }
            }
            Method::Delete => {
                let mut store = self.stores.open(&resource.collection)?;
                if store.remove(id)? {
                    Ok(ApiResponse::empty(202))
                } else {
                    Ok(not_found(resource, id))
                }
            }
            ref other => Ok(not_supported(other)),
        }
    }
}

/// Why a mutating request carried no usable record
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rejection {
    NoPayload(&'static str),
    Invalid(FieldError),
}

impl From<Rejection> for ApiResponse {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::NoPayload(message) => Self::text(400, message),
            Rejection::Invalid(error) => Self::text(400, error.message),
        }
    }
}

fn validated_payload(
    resource: &ResourceType,
    request: &ApiRequest,
) -> std::result::Result<Record, Rejection> {
    let payload = request.payload();
    let value = match payload {
        Payload::Json(value) => value,
        other => {
            return Err(Rejection::NoPayload(
                other.rejection().unwrap_or("Request body is missing"),
            ))
        }
    };

    resource.schema.validate(&value).map_err(Rejection::Invalid)?;
    match value {
        Value::Object(record) => Ok(record),
        _ => Err(Rejection::Invalid(FieldError::not_an_object())),
    }
}

/// Bind the record to the path id, refusing a conflicting body `Id`
fn claim_id(record: &mut Record, id: i64) -> ValidationResult<()> {
    if record.contains_key(ID_FIELD) {
        return if record_id(record) == Some(id) {
            Ok(())
        } else {
            Err(FieldError::id_mismatch())
        };
    }

    let mut claimed = Record::new();
    claimed.insert(ID_FIELD.to_string(), Value::from(id));
    claimed.append(record);
    *record = claimed;
    Ok(())
}

fn not_found(resource: &ResourceType, id: i64) -> ApiResponse {
    ApiResponse::text(404, format!("{} {id} not found", resource.name))
}

fn not_supported(method: &Method) -> ApiResponse {
    ApiResponse::text(501, format!("{method} method not supported by this service."))
}
