use std::{io::ErrorKind, path::Path, sync::Arc};

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path as UrlPath, Query, State, multipart::MultipartError,
    },
    http::{StatusCode, Uri, header},
    response::{Html, IntoResponse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{fs, task};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    geonames::{CountryOrder, GeonamesStore},
    model::{
        DiabetesPrediction, DiabetesRequest, ImagePredictionResponse, ModelMetadata, ModelRegistry,
    },
};

const FALLBACK_PAGE: &str = "index.htm";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
    pub geonames: Option<Arc<GeonamesStore>>,
}

#[derive(Serialize)]
struct MetadataResponse {
    image: Option<ModelMetadata>,
    tabular: Option<ModelMetadata>,
    geonames: bool,
}

#[derive(Deserialize)]
struct CountriesQuery {
    order_by: Option<String>,
}

#[derive(Deserialize)]
struct SearchQuery {
    country: Option<String>,
    city: Option<String>,
}

pub fn build_router(
    config: Arc<AppConfig>,
    registry: Arc<ModelRegistry>,
    geonames: Option<Arc<GeonamesStore>>,
) -> Router {
    let upload_limit = DefaultBodyLimit::max(config.max_upload_bytes);
    let state = AppState {
        config,
        registry,
        geonames,
    };

    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/metadata", get(metadata))
        .route(
            "/predict/resnet50",
            post(predict_resnet50).layer(upload_limit),
        )
        .route("/predict/pima-indians-diabetes", post(predict_pima))
        .route("/data/geonames/countries", get(countries))
        .route("/data/geonames/regions/:country", get(regions))
        .route("/data/geonames/cities/:country/:region", get(cities))
        .route("/data/geonames/place/:id", get(place))
        .route("/data/geonames/search", get(search))
        .fallback(not_found)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn home(State(state): State<AppState>) -> Result<Html<String>, ServiceError> {
    for path in [state.config.demo_page_path.as_path(), Path::new(FALLBACK_PAGE)] {
        match fs::read_to_string(path).await {
            Ok(page) => return Ok(Html(page)),
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::NotFound(format!(
        "demo page {}",
        state.config.demo_page_path.display()
    )))
}

async fn metadata(State(state): State<AppState>) -> Json<MetadataResponse> {
    let (image, tabular) = state.registry.metadata();
    Json(MetadataResponse {
        image,
        tabular,
        geonames: state.geonames.is_some(),
    })
}

async fn predict_resnet50(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ImagePredictionResponse>, ServiceError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(upload_error)?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(upload_error)?;
            upload = Some(bytes);
            break;
        }
    }

    let bytes = upload
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ServiceError::BadRequest("missing form field 'file'".into()))?;
    info!(size = bytes.len(), "image upload received");

    let predictions = state.registry.classify_image(bytes.to_vec()).await?;
    Ok(Json(ImagePredictionResponse { predictions }))
}

/// Keeps the body-limit rejection distinct from malformed multipart data.
fn upload_error(err: MultipartError) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge(err.body_text())
    } else {
        ServiceError::BadRequest(err.body_text())
    }
}

async fn predict_pima(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<DiabetesPrediction>, ServiceError> {
    let request = DiabetesRequest::from_value(&body)?;
    let prediction = state.registry.predict_diabetes(request.record).await?;
    Ok(Json(prediction))
}

async fn countries(
    State(state): State<AppState>,
    Query(query): Query<CountriesQuery>,
) -> Result<Json<Value>, ServiceError> {
    let order = match query.order_by.as_deref() {
        Some("country" | "name") => CountryOrder::Name,
        _ => CountryOrder::Population,
    };
    let records = with_store(&state, move |store| store.countries(order)).await?;
    Ok(Json(json!({ "countries": records })))
}

async fn regions(
    State(state): State<AppState>,
    UrlPath(country): UrlPath<String>,
) -> Result<Json<Value>, ServiceError> {
    let records = with_store(&state, move |store| store.regions(&country)).await?;
    Ok(Json(json!({ "regions": records })))
}

async fn cities(
    State(state): State<AppState>,
    UrlPath((country, region)): UrlPath<(String, String)>,
) -> Result<Json<Value>, ServiceError> {
    let records = with_store(&state, move |store| store.cities(&country, &region)).await?;
    Ok(Json(json!({ "cities": records })))
}

async fn place(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<i64>,
) -> Result<Json<Value>, ServiceError> {
    let record = with_store(&state, move |store| store.place(id)).await?;
    Ok(Json(json!({ "place": record })))
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, ServiceError> {
    let city = query
        .city
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ServiceError::BadRequest("query parameter 'city' is required".into()))?;
    let country = query.country;
    let records =
        with_store(&state, move |store| store.search(country.as_deref(), &city)).await?;
    Ok(Json(json!({ "cities": records })))
}

/// Runs a blocking SQLite query off the async runtime.
async fn with_store<T, F>(state: &AppState, query: F) -> Result<T, ServiceError>
where
    F: FnOnce(&GeonamesStore) -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    let store = state.geonames.clone().ok_or_else(|| {
        ServiceError::ModelUnavailable("geonames database is not configured".into())
    })?;
    task::spawn_blocking(move || query(&store))
        .await
        .map_err(|err| ServiceError::Other(format!("lookup task failed: {err}")))?
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("Page not found: {}", uri.path()),
    )
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{self, Body},
        http::Request,
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        geonames,
        model::{ModelArtifacts, OutputKind, test_support},
    };

    const BOUNDARY: &str = "demo-boundary";

    fn test_config(demo_page: &Path) -> Arc<AppConfig> {
        let mut config = AppConfig::from_lookup(|_| None).unwrap();
        config.demo_page_path = demo_page.to_path_buf();
        Arc::new(config)
    }

    fn loaded_registry() -> Arc<ModelRegistry> {
        Arc::new(ModelRegistry::from_artifacts(ModelArtifacts {
            image: Some(Arc::new(test_support::stub_classifier(
                vec![0.1, 0.2, 0.7],
                OutputKind::Probabilities,
            ))),
            tabular: Some(Arc::new(test_support::pima_classifier())),
        }))
    }

    fn empty_registry() -> Arc<ModelRegistry> {
        Arc::new(ModelRegistry::from_artifacts(ModelArtifacts {
            image: None,
            tabular: None,
        }))
    }

    fn app() -> (TempDir, Router) {
        let (dir, store) = geonames::sample_store();
        let router = build_router(
            test_config(&dir.path().join("missing.htm")),
            loaded_registry(),
            Some(Arc::new(store)),
        );
        (dir, router)
    }

    fn multipart_request(field: &str, payload: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict/resnet50")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(router, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_and_metadata() {
        let (_dir, router) = app();
        let (status, body) = send(router.clone(), get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");

        let (status, body) = send_json(router, get_request("/metadata")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["image"]["name"], "stub");
        assert_eq!(body["tabular"]["name"], "pima-indians-diabetes");
        assert_eq!(body["geonames"], true);
    }

    #[tokio::test]
    async fn classifies_uploaded_image() {
        let (_dir, router) = app();
        let (status, body) = send_json(
            router,
            multipart_request("file", &test_support::png_bytes()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let predictions = body["predictions"].as_array().unwrap();
        assert_eq!(predictions[0]["label"], "ski");
    }

    #[tokio::test]
    async fn upload_without_file_field_is_rejected() {
        let (_dir, router) = app();
        let (status, body) = send_json(router, multipart_request("photo", b"abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("file"));
    }

    #[tokio::test]
    async fn uploads_over_the_limit_are_rejected_as_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::from_lookup(|_| None).unwrap();
        config.demo_page_path = dir.path().join("x.htm");
        config.max_upload_bytes = 64;
        let router = build_router(Arc::new(config), loaded_registry(), None);

        let (status, body) = send_json(router, multipart_request("file", &[7u8; 4096])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].as_str().unwrap().starts_with("payload too large"));
    }

    #[tokio::test]
    async fn undecodable_upload_is_a_bad_request() {
        let (_dir, router) = app();
        let (status, _) = send(router, multipart_request("file", b"not an image")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_models_answer_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_config(&dir.path().join("x.htm")), empty_registry(), None);

        let (status, _) = send(
            router.clone(),
            multipart_request("file", &test_support::png_bytes()),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = send(
            router.clone(),
            json_request(
                "/predict/pima-indians-diabetes",
                json!({"values": [1, 89, 66, 23, 94, 28.1, 0.167, 21]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = send(router, get_request("/data/geonames/countries")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn predicts_diabetes_from_values_and_form_fields() {
        let (_dir, router) = app();
        let (status, body) = send_json(
            router.clone(),
            json_request(
                "/predict/pima-indians-diabetes",
                json!({"values": [7, 195, 70, 33, 145, 25.1, 0.163, 55]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["prediction"], 1);
        let probability = body["probability"].as_f64().unwrap();
        assert!(probability > 0.5 && probability < 1.0);

        let form = json!({
            "pregnancies": "7",
            "glucose": "195",
            "bloodPressure": "70",
            "skinThickness": "33",
            "insulin": "145",
            "bmi": "25.1",
            "diabetesPedigreeFunction": "0.163",
            "age": "55",
        });
        let (status, from_form) = send_json(
            router.clone(),
            json_request("/predict/pima-indians-diabetes", form),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(from_form, body);

        let (status, _) = send(
            router,
            json_request(
                "/predict/pima-indians-diabetes",
                json!({"glucose": "89"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn geonames_routes() {
        let (_dir, router) = app();

        let (status, body) = send_json(router.clone(), get_request("/data/geonames/countries")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["countries"][0]["iso"], "US");

        let (_, body) = send_json(
            router.clone(),
            get_request("/data/geonames/countries?order_by=country"),
        )
        .await;
        assert_eq!(body["countries"][0]["iso"], "AD");

        let (_, body) = send_json(router.clone(), get_request("/data/geonames/regions/US")).await;
        assert_eq!(body["regions"].as_array().unwrap().len(), 2);

        let (_, body) = send_json(router.clone(), get_request("/data/geonames/cities/US/NY")).await;
        assert_eq!(body["cities"][0]["name"], "New York City");

        let (status, body) =
            send_json(router.clone(), get_request("/data/geonames/place/5128581")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["place"]["alternate_names"][1], "NYC");

        let (status, _) = send(router.clone(), get_request("/data/geonames/place/42")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send_json(
            router.clone(),
            get_request("/data/geonames/search?country=US&city=queens"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cities"][0]["geonames_id"], 5133273);

        let (status, _) = send(router, get_request("/data/geonames/search?country=US")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn serves_demo_page() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("ai-ml-demo.htm");
        std::fs::write(&page, "<h1>demo</h1>").unwrap();
        let router = build_router(test_config(&page), empty_registry(), None);

        let response = router.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"<h1>demo</h1>");
    }

    #[tokio::test]
    async fn unknown_paths_are_plain_text_404s() {
        let (_dir, router) = app();
        let response = router.oneshot(get_request("/nope/here")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"Page not found: /nope/here");
    }
}
