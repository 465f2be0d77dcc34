use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::handlers::auth::{
    AuthResponse, ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest,
};
use crate::handlers::contact::ContactRequest;
use crate::handlers::stripe::CheckoutSessionRequest;
use crate::models::{
    Booking, BookingDetails, BookingInput, BookingStatus, BookingUpdate, ClassInput,
    ClassOccurrence, ClassSummary, ProfileUpdate, User, UserSummary,
};

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "query_token",
            SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("token"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz_live,
        crate::handlers::healthz_ready,
        crate::handlers::classes::list_classes,
        crate::handlers::classes::get_class,
        crate::handlers::classes::get_class_by_slug,
        crate::handlers::classes::get_ical,
        crate::handlers::classes::create_class,
        crate::handlers::classes::update_class,
        crate::handlers::classes::delete_class,
        crate::handlers::bookings::my_bookings,
        crate::handlers::bookings::list_bookings,
        crate::handlers::bookings::get_booking,
        crate::handlers::bookings::create_booking,
        crate::handlers::bookings::update_booking,
        crate::handlers::bookings::delete_booking,
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::forgot_password,
        crate::handlers::auth::custom_forgot_password,
        crate::handlers::auth::reset_password,
        crate::handlers::auth::me,
        crate::handlers::auth::update_me,
        crate::handlers::stripe::create_checkout_session,
        crate::handlers::stripe::stripe_webhook,
        crate::handlers::contact::contact
    ),
    components(schemas(
        ClassOccurrence,
        ClassInput,
        Booking,
        BookingStatus,
        BookingDetails,
        BookingInput,
        BookingUpdate,
        ClassSummary,
        UserSummary,
        User,
        ProfileUpdate,
        RegisterRequest,
        LoginRequest,
        ForgotPasswordRequest,
        ResetPasswordRequest,
        AuthResponse,
        CheckoutSessionRequest,
        ContactRequest
    )),
    tags(
        (name = "service", description = "Service banner and health checks"),
        (name = "classes", description = "Class timetable"),
        (name = "bookings", description = "Class bookings"),
        (name = "auth", description = "Accounts and sessions"),
        (name = "payments", description = "Stripe checkout and webhooks"),
        (name = "contact", description = "Contact form")
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;
