use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info, warn};
use warp::filters::body::BodyDeserializeError;
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::{Filter, Rejection, Reply};

use crate::auth::{bearer_token, Principal, SignInRequest};
use crate::error::HealthError;
use crate::records::{
    AppointmentStatus, HealthInfoUpdate, NewAppointment, NewBloodSugar, NewEmergencyContact, NewMedication,
    NewMedicationLog,
};
use crate::service::{CareService, SignupRequest};

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug)]
struct ApiRejection(HealthError);

impl Reject for ApiRejection {}

fn reject(error: HealthError) -> Rejection {
    warp::reject::custom(ApiRejection(error))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusUpdate {
    status: AppointmentStatus,
}

/// HTTP status for a service error.
pub fn status_for(error: &HealthError) -> StatusCode {
    match error {
        HealthError::Unauthorized => StatusCode::UNAUTHORIZED,
        HealthError::NotFound(_) => StatusCode::NOT_FOUND,
        HealthError::Validation(_) => StatusCode::BAD_REQUEST,
        HealthError::StoreUnavailable(_)
        | HealthError::PartialIndexFailure { .. }
        | HealthError::Corrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub struct RestApi {
    service: Arc<CareService>,
}

impl RestApi {
    pub fn new(service: Arc<CareService>) -> Self {
        RestApi { service }
    }

    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        let access_log = warp::log::custom(|info| {
            info!(
                method = %info.method(),
                path = info.path(),
                status = info.status().as_u16(),
                elapsed_ms = info.elapsed().as_millis() as u64,
                "request"
            );
        });

        self.health()
            .or(self.signup())
            .or(self.sign_in())
            .or(self.profile())
            .or(self.health_info())
            .or(self.appointments())
            .or(self.medications())
            .or(self.medication_logs())
            .or(self.blood_sugar())
            .or(self.emergency_contacts())
            .or(self.reindex())
            .recover(handle_rejection)
            .with(access_log)
    }

    fn with_service(&self) -> impl Filter<Extract = (Arc<CareService>,), Error = Infallible> + Clone {
        let service = Arc::clone(&self.service);
        warp::any().map(move || Arc::clone(&service))
    }

    /// Resolves `Authorization: Bearer <token>` to a principal.
    fn authenticated(&self) -> impl Filter<Extract = (Principal, Arc<CareService>), Error = Rejection> + Clone {
        warp::header::optional::<String>("authorization")
            .and(self.with_service())
            .and_then(|header: Option<String>, service: Arc<CareService>| async move {
                let token = header
                    .as_deref()
                    .and_then(bearer_token)
                    .ok_or_else(|| reject(HealthError::Unauthorized))?;
                let principal = service.authenticate(token).await.map_err(reject)?;
                Ok::<_, Rejection>(principal)
            })
            .and(self.with_service())
    }

    fn health(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        warp::path!("health")
            .and(warp::get())
            .and(self.with_service())
            .map(|service: Arc<CareService>| warp::reply::json(&json!({ "status": "ok", "backend": service.backend() })))
    }

    fn signup(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        warp::path!("signup")
            .and(warp::post())
            .and(json_body::<SignupRequest>())
            .and(self.with_service())
            .and_then(|request: SignupRequest, service: Arc<CareService>| async move {
                let user = service.signup(request, None).await.map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "user": user })))
            })
    }

    fn sign_in(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        warp::path!("signin")
            .and(warp::post())
            .and(json_body::<SignInRequest>())
            .and(self.with_service())
            .and_then(|request: SignInRequest, service: Arc<CareService>| async move {
                let session = service
                    .sign_in(&request.email, &request.password)
                    .await
                    .map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "session": session })))
            })
    }

    fn profile(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        warp::path!("profile")
            .and(warp::get())
            .and(self.authenticated())
            .and_then(|principal: Principal, service: Arc<CareService>| async move {
                let profile = service.profile(&principal).await.map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "profile": profile })))
            })
    }

    fn health_info(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        warp::path!("health-info")
            .and(warp::put())
            .and(self.authenticated())
            .and(json_body::<HealthInfoUpdate>())
            .and_then(
                |principal: Principal, service: Arc<CareService>, update: HealthInfoUpdate| async move {
                    let profile = service.update_health_info(&principal, update).await.map_err(reject)?;
                    Ok::<_, Rejection>(warp::reply::json(&json!({ "profile": profile })))
                },
            )
    }

    fn appointments(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let create = warp::path!("appointments")
            .and(warp::post())
            .and(self.authenticated())
            .and(json_body::<NewAppointment>())
            .and_then(
                |principal: Principal, service: Arc<CareService>, input: NewAppointment| async move {
                    let appointment = service.create_appointment(&principal, input).await.map_err(reject)?;
                    Ok::<_, Rejection>(warp::reply::json(&json!({ "appointment": appointment })))
                },
            );

        let list = warp::path!("appointments")
            .and(warp::get())
            .and(self.authenticated())
            .and_then(|principal: Principal, service: Arc<CareService>| async move {
                let appointments = service.appointments(&principal).await.map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "appointments": appointments })))
            });

        let update_status = warp::path!("appointments" / String / "status")
            .and(warp::put())
            .and(self.authenticated())
            .and(json_body::<StatusUpdate>())
            .and_then(
                |id: String, principal: Principal, service: Arc<CareService>, update: StatusUpdate| async move {
                    let appointment = service
                        .update_appointment_status(&principal, &id, update.status)
                        .await
                        .map_err(reject)?;
                    Ok::<_, Rejection>(warp::reply::json(&json!({ "appointment": appointment })))
                },
            );

        create.or(list).or(update_status)
    }

    fn medications(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let create = warp::path!("medications")
            .and(warp::post())
            .and(self.authenticated())
            .and(json_body::<NewMedication>())
            .and_then(
                |principal: Principal, service: Arc<CareService>, input: NewMedication| async move {
                    let medication = service.create_medication(&principal, input).await.map_err(reject)?;
                    Ok::<_, Rejection>(warp::reply::json(&json!({ "medication": medication })))
                },
            );

        let list = warp::path!("medications")
            .and(warp::get())
            .and(self.authenticated())
            .and_then(|principal: Principal, service: Arc<CareService>| async move {
                let medications = service.medications(&principal).await.map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "medications": medications })))
            });

        let today = warp::path!("today-medications")
            .and(warp::get())
            .and(self.authenticated())
            .and_then(|principal: Principal, service: Arc<CareService>| async move {
                let medications = service.today_medications(&principal).await.map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "medications": medications })))
            });

        create.or(list).or(today)
    }

    fn medication_logs(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let create = warp::path!("medication-logs")
            .and(warp::post())
            .and(self.authenticated())
            .and(json_body::<NewMedicationLog>())
            .and_then(
                |principal: Principal, service: Arc<CareService>, input: NewMedicationLog| async move {
                    let log = service.log_medication(&principal, input).await.map_err(reject)?;
                    Ok::<_, Rejection>(warp::reply::json(&json!({ "log": log })))
                },
            );

        let list = warp::path!("medication-logs")
            .and(warp::get())
            .and(self.authenticated())
            .and_then(|principal: Principal, service: Arc<CareService>| async move {
                let logs = service.medication_logs(&principal).await.map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "logs": logs })))
            });

        let adherence = warp::path!("adherence" / "today")
            .and(warp::get())
            .and(self.authenticated())
            .and_then(|principal: Principal, service: Arc<CareService>| async move {
                let adherence = service.adherence_today(&principal).await.map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "adherence": adherence })))
            });

        create.or(list).or(adherence)
    }

    fn blood_sugar(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let create = warp::path!("blood-sugar")
            .and(warp::post())
            .and(self.authenticated())
            .and(json_body::<NewBloodSugar>())
            .and_then(
                |principal: Principal, service: Arc<CareService>, input: NewBloodSugar| async move {
                    let record = service.record_blood_sugar(&principal, input).await.map_err(reject)?;
                    Ok::<_, Rejection>(warp::reply::json(&json!({ "record": record })))
                },
            );

        let list = warp::path!("blood-sugar")
            .and(warp::get())
            .and(self.authenticated())
            .and_then(|principal: Principal, service: Arc<CareService>| async move {
                let records = service.blood_sugar(&principal).await.map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "records": records })))
            });

        let summary = warp::path!("blood-sugar" / "summary")
            .and(warp::get())
            .and(self.authenticated())
            .and_then(|principal: Principal, service: Arc<CareService>| async move {
                let summary = service.blood_sugar_summary(&principal).await.map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "summary": summary })))
            });

        create.or(list).or(summary)
    }

    fn emergency_contacts(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let add = warp::path!("emergency-contacts")
            .and(warp::post())
            .and(self.authenticated())
            .and(json_body::<NewEmergencyContact>())
            .and_then(
                |principal: Principal, service: Arc<CareService>, input: NewEmergencyContact| async move {
                    let contacts = service.add_contact(&principal, input).await.map_err(reject)?;
                    Ok::<_, Rejection>(warp::reply::json(&json!({ "contacts": contacts })))
                },
            );

        let list = warp::path!("emergency-contacts")
            .and(warp::get())
            .and(self.authenticated())
            .and_then(|principal: Principal, service: Arc<CareService>| async move {
                let contacts = service.contacts(&principal).await.map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "contacts": contacts })))
            });

        add.or(list)
    }

    fn reindex(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let check = warp::path!("reindex")
            .and(warp::get())
            .and(self.authenticated())
            .and_then(|principal: Principal, service: Arc<CareService>| async move {
                let checks = service.check_indexes(&principal).await.map_err(reject)?;
                let consistent = checks.iter().all(|check| check.missing.is_empty());
                Ok::<_, Rejection>(warp::reply::json(&json!({ "consistent": consistent, "checks": checks })))
            });

        let rebuild = warp::path!("reindex")
            .and(warp::post())
            .and(self.authenticated())
            .and_then(|principal: Principal, service: Arc<CareService>| async move {
                let reports = service.reindex(&principal).await.map_err(reject)?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "reports": reports })))
            });

        check.or(rebuild)
    }
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(ApiRejection(error)) = err.find::<ApiRejection>() {
        let status = status_for(error);
        if status.is_server_error() {
            error!(error = %error, "request failed");
        }
        (status, error.to_string())
    } else if let Some(e) = err.find::<BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected a JSON body".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required".to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        warn!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "error": message })),
        status,
    ))
}
