use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "storefront-api",
        description = "Catalog reads, Mercado Pago checkout and webhook-driven order settlement"
    ),
    paths(
        crate::handlers::checkout::create_preference,
        crate::handlers::checkout::webhook,
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::health::health,
    ),
    components(schemas(
        crate::services::checkout::CreatePreferenceRequest,
        crate::services::checkout::CartLineInput,
        crate::services::checkout::CreatePreferenceResponse,
        crate::errors::ErrorResponse,
    )),
    tags(
        (name = "Checkout", description = "Preference creation and payment webhooks"),
        (name = "Catalog", description = "Product reads"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
