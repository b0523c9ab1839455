use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::{Method, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use futures::FutureExt;
use log::{debug, error, warn};
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::config::ServerConfig;
use crate::server::envelope::{guard, panic_message, Envelope, Payload};
use crate::{BucketEnumeration, BucketManager, BucketStore, Error, KVReader, KVWriter, Result};

/// Maps HTTP requests onto bucket/key operations.
///
/// Every operation runs as one store transaction on the blocking pool, bounded by the
/// in-flight semaphore and the request deadline. Every response is an [`Envelope`]
/// with status 200.
#[derive(Clone)]
pub struct Router {
    store: Arc<dyn BucketStore>,
    semaphore: Arc<Semaphore>,
    request_timeout: Duration,
    max_body_bytes: usize,
}

type BucketPath = std::result::Result<Path<String>, PathRejection>;
type KeyPath = std::result::Result<Path<(String, String)>, PathRejection>;

#[derive(Debug, Deserialize)]
struct ListKeysQuery {
    bucket: String,
}

impl Router {
    pub fn new(store: Arc<dyn BucketStore>, config: &ServerConfig) -> Self {
        Self {
            store,
            semaphore: Arc::new(Semaphore::new(config.max_inflight)),
            request_timeout: config.request_timeout,
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Builds the route table.
    pub fn into_app(self) -> axum::Router {
        axum::Router::new()
            .route("/CreateBucket/{bucket}", keys_of("CreateBucket", get(create_bucket)))
            .route(
                "/CreateBucketIfNotExists/{bucket}",
                keys_of("CreateBucketIfNotExists", get(create_bucket_if_not_exists)),
            )
            .route("/DeleteBucket/{bucket}", keys_of("DeleteBucket", get(delete_bucket)))
            .route("/ListBuckets", get(list_buckets))
            .route("/ListKeys", get(list_keys))
            .route("/{bucket}/{key}", get(get_key).put(put_key).delete(delete_key))
            .fallback(unknown_route)
            .method_not_allowed_fallback(unknown_route)
            .with_state(self)
            .layer(middleware::from_fn(catch_panic))
    }

    /// Runs `work` against the store on the blocking pool.
    ///
    /// The semaphore permit is held by the blocking task, so a request that hits its
    /// deadline still counts against the in-flight limit until its transaction ends.
    async fn run<T, F>(&self, op: &'static str, bucket: String, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BucketStore, &str) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let semaphore = self.semaphore.clone();
        let log_bucket = bucket.clone();

        let task = async move {
            let permit = semaphore.acquire_owned().await.map_err(|e| {
                error!("{} could not acquire an operation slot: {}", op, e);
                Error::Internal
            })?;

            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                guard(op, &bucket, || work(&*store, &bucket))
            });

            match handle.await {
                Ok(res) => res,
                Err(e) => {
                    error!("{} failed to complete: {}", op, e);
                    Err(Error::Internal)
                }
            }
        };

        match tokio::time::timeout(self.request_timeout, task).await {
            Ok(res) => {
                if let Err(e) = &res {
                    debug!("{} on bucket {:?}: {}", op, log_bucket, e);
                }
                res
            }
            Err(_) => {
                warn!("{} on bucket {:?} exceeded the request deadline", op, log_bucket);
                Err(Error::Timeout)
            }
        }
    }
}

fn bad_path(rejection: PathRejection) -> Error {
    Error::BadRequest(rejection.body_text())
}

/// Adds `PUT` and `DELETE` to an operation route, so a bucket that shares its name with an
/// operation still has its keys reachable at `/{bucket}/{key}`.
fn keys_of(bucket: &'static str, route: MethodRouter<Router>) -> MethodRouter<Router> {
    let in_bucket = move |path: BucketPath| path.map(|Path(key)| Path((bucket.to_string(), key)));
    route
        .put(move |state: State<Router>, path: BucketPath, body: Body| put_key(state, in_bucket(path), body))
        .delete(move |state: State<Router>, path: BucketPath| delete_key(state, in_bucket(path)))
}

async fn create_bucket(State(router): State<Router>, path: BucketPath) -> Envelope {
    let Path(bucket) = match path {
        Ok(path) => path,
        Err(rejection) => return Envelope::status(Err(bad_path(rejection))),
    };
    Envelope::status(
        router
            .run("CreateBucket", bucket, |store, bucket| store.create_bucket(bucket))
            .await,
    )
}

async fn create_bucket_if_not_exists(State(router): State<Router>, path: BucketPath) -> Envelope {
    let Path(bucket) = match path {
        Ok(path) => path,
        Err(rejection) => return Envelope::status(Err(bad_path(rejection))),
    };
    Envelope::status(
        router
            .run("CreateBucketIfNotExists", bucket, |store, bucket| {
                store.create_bucket_if_not_exists(bucket)
            })
            .await,
    )
}

async fn delete_bucket(State(router): State<Router>, path: BucketPath) -> Envelope {
    let Path(bucket) = match path {
        Ok(path) => path,
        Err(rejection) => return Envelope::status(Err(bad_path(rejection))),
    };
    Envelope::status(
        router
            .run("DeleteBucket", bucket, |store, bucket| store.delete_bucket(bucket))
            .await,
    )
}

async fn list_buckets(State(router): State<Router>) -> Envelope {
    Envelope::data(
        router
            .run("ListBuckets", String::new(), |store, _| {
                store.list_buckets().map(Payload::List)
            })
            .await,
    )
}

async fn list_keys(
    State(router): State<Router>,
    query: std::result::Result<Query<ListKeysQuery>, QueryRejection>,
) -> Envelope {
    let bucket = match query {
        Ok(Query(query)) => query.bucket,
        Err(rejection) => return Envelope::data(Err(Error::BadRequest(rejection.body_text()))),
    };
    Envelope::data(
        router
            .run("ListKeys", bucket, |store, bucket| {
                let keys = store.list_keys(bucket)?;
                Ok(Payload::List(keys.iter().map(|k| lossy(k)).collect()))
            })
            .await,
    )
}

async fn get_key(State(router): State<Router>, path: KeyPath) -> Envelope {
    let Path((bucket, key)) = match path {
        Ok(path) => path,
        Err(rejection) => return Envelope::data(Err(bad_path(rejection))),
    };
    Envelope::data(
        router
            .run("Get", bucket, move |store, bucket| {
                let value = store.get(bucket, key.as_bytes())?;
                Ok(Payload::Value(lossy(&value)))
            })
            .await,
    )
}

async fn put_key(State(router): State<Router>, path: KeyPath, body: Body) -> Envelope {
    let Path((bucket, key)) = match path {
        Ok(path) => path,
        Err(rejection) => return Envelope::status(Err(bad_path(rejection))),
    };
    let value = match axum::body::to_bytes(body, router.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return Envelope::status(Err(Error::BadRequest(format!("failed to read body: {}", e))))
        }
    };
    Envelope::status(
        router
            .run("Put", bucket, move |store, bucket| store.put(bucket, key.as_bytes(), &value))
            .await,
    )
}

async fn delete_key(State(router): State<Router>, path: KeyPath) -> Envelope {
    let Path((bucket, key)) = match path {
        Ok(path) => path,
        Err(rejection) => return Envelope::status(Err(bad_path(rejection))),
    };
    Envelope::status(
        router
            .run("Delete", bucket, move |store, bucket| store.delete(bucket, key.as_bytes()))
            .await,
    )
}

async fn unknown_route(method: Method, uri: Uri) -> Envelope {
    Envelope::status(Err(Error::BadRequest(format!("no route for {} {}", method, uri.path()))))
}

/// Last line of defence: a panic anywhere in the handler stack becomes a generic envelope.
async fn catch_panic(req: Request, next: Next) -> Response {
    let route = format!("{} {}", req.method(), req.uri().path());
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            error!("handler for {} panicked: {}", route, panic_message(&*payload));
            Envelope::fault().into_response()
        }
    }
}

// Values are raw bytes; invalid UTF-8 is replaced rather than rejected.
fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
