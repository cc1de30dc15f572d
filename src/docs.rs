use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::health::handler::index,
        crate::modules::health::handler::health,
        crate::modules::convert::handler::convert,
    ),
    components(
        schemas(
            crate::modules::health::dto::HealthResponse,
            crate::modules::health::dto::InfoResponse,
            crate::common::response::ErrorBody,
        )
    ),
    tags(
        (name = "System", description = "Service status"),
        (name = "Convert", description = "WebM to MP4 conversion")
    )
)]
pub struct ApiDoc;
