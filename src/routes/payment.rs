use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::FindOptions;
use rocket::futures::TryStreamExt;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use uuid::Uuid;
use validator::Validate;
use log::{error, info, warn};

use crate::config::Config;
use crate::db::{DbConn, PAYMENTS, PROJECTS, SERVICES, USERS};
use crate::guards::{AuthGuard, ClientGuard};
use crate::models::{
    CreatePaymentDto, Payment, PaymentResponse, PaymentStatus, Project, Service, User,
};
use crate::services::midtrans::{ChargeRequest, TransactionNotification};
use crate::services::{EmailService, MidtransService};
use crate::utils::{parse_object_id, ApiError, ApiResponse, ApiResult, Pagination};

/// What the caller is about to pay for, resolved from the request.
struct Checkout {
    payee_id: ObjectId,
    project_id: Option<ObjectId>,
    service_id: Option<ObjectId>,
    item_id: String,
    description: String,
    amount: f64,
}

fn new_order_id() -> String {
    format!("ORDER-{}", Uuid::new_v4().simple())
}

/// Midtrans reports amounts like "150000.00"; compare in whole rupiah.
fn amount_matches(gross_amount: &str, amount: f64) -> bool {
    gross_amount
        .trim()
        .parse::<f64>()
        .map(|gross| MidtransService::gross_amount(gross) == MidtransService::gross_amount(amount))
        .unwrap_or(false)
}

async fn project_checkout(db: &DbConn, payer_id: ObjectId, project_id: ObjectId) -> Result<Checkout, ApiError> {
    let project = db
        .collection::<Project>(PROJECTS)
        .find_one(doc! { "_id": project_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;

    if project.client_id != payer_id {
        return Err(ApiError::forbidden("Only the project owner can pay for it"));
    }
    if project.status.is_terminal() {
        return Err(ApiError::conflict(format!(
            "Project is already {}",
            project.status.as_str()
        )));
    }
    let payee_id = project
        .freelancer_id
        .ok_or_else(|| ApiError::bad_request("Assign a freelancer before paying for the project"))?;

    if project.paid_order_id.is_some() {
        return Err(ApiError::conflict("Project has already been paid"));
    }

    let open_payment = db
        .collection::<Payment>(PAYMENTS)
        .find_one(
            doc! {
                "project_id": project_id,
                "status": { "$in": [PaymentStatus::Pending.as_str(), PaymentStatus::Success.as_str()] },
            },
            None,
        )
        .await?;
    refuse_second_payment(open_payment.as_ref())?;

    Ok(Checkout {
        payee_id,
        project_id: Some(project_id),
        service_id: None,
        item_id: project_id.to_hex(),
        description: format!("Project: {}", project.title),
        amount: project.budget,
    })
}

/// A project takes one payment at a time: none while another is pending,
/// and none once one has succeeded.
fn refuse_second_payment(existing: Option<&Payment>) -> Result<(), ApiError> {
    match existing {
        Some(p) if p.status == PaymentStatus::Success => {
            Err(ApiError::conflict("Project has already been paid"))
        }
        Some(p) => Err(ApiError::conflict(format!(
            "Payment {} for this project is still pending",
            p.order_id
        ))),
        None => Ok(()),
    }
}

async fn service_checkout(db: &DbConn, payer_id: ObjectId, service_id: ObjectId) -> Result<Checkout, ApiError> {
    let service = db
        .collection::<Service>(SERVICES)
        .find_one(doc! { "_id": service_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Service not found"))?;

    if service.freelancer_id == payer_id {
        return Err(ApiError::bad_request("You cannot buy your own service"));
    }

    Ok(Checkout {
        payee_id: service.freelancer_id,
        project_id: None,
        service_id: Some(service_id),
        item_id: service_id.to_hex(),
        description: format!("Service: {}", service.title),
        amount: service.price,
    })
}

/// Balance effect a payment status carries for the payee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ledger {
    Credit,
    Debit,
    Nothing,
}

impl Ledger {
    fn of(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Success => Ledger::Credit,
            PaymentStatus::Refunded => Ledger::Debit,
            _ => Ledger::Nothing,
        }
    }
}

/// Outcome of a report of `next` for a payment stored as `stored`.
#[derive(Debug, PartialEq, Eq)]
struct Settlement {
    /// Whether the stored status moves.
    advance: bool,
    ledger: Ledger,
}

/// `None` means the report is refused. A repeated report re-applies the
/// ledger of the stored status, which completes a settlement interrupted
/// between the status write and the balance write.
fn settlement(stored: PaymentStatus, next: PaymentStatus) -> Option<Settlement> {
    if stored == next {
        Some(Settlement { advance: false, ledger: Ledger::of(stored) })
    } else if stored.can_become(next) {
        Some(Settlement { advance: true, ledger: Ledger::of(next) })
    } else {
        None
    }
}

/// Filter and update adding `amount` to the payee once per order.
fn credit_update(payment: &Payment) -> (Document, Document) {
    (
        doc! { "_id": payment.payee_id, "credited_orders": { "$ne": &payment.order_id } },
        doc! {
            "$inc": { "balance": payment.amount },
            "$push": { "credited_orders": &payment.order_id },
            "$set": { "updated_at": DateTime::now() },
        },
    )
}

/// Filter and update taking a credited order back out of the balance.
fn debit_update(payment: &Payment) -> (Document, Document) {
    (
        doc! { "_id": payment.payee_id, "credited_orders": &payment.order_id },
        doc! {
            "$inc": { "balance": -payment.amount },
            "$pull": { "credited_orders": &payment.order_id },
            "$set": { "updated_at": DateTime::now() },
        },
    )
}

/// Claims the project for this order; false when another order paid it.
async fn claim_project(db: &DbConn, project_id: ObjectId, order_id: &str) -> Result<bool, ApiError> {
    let claimed = db
        .collection::<Project>(PROJECTS)
        .update_one(
            doc! {
                "_id": project_id,
                "$or": [ { "paid_order_id": null }, { "paid_order_id": order_id } ],
            },
            doc! { "$set": { "paid_order_id": order_id } },
            None,
        )
        .await?;
    Ok(claimed.matched_count == 1)
}

async fn credit_payee(db: &DbConn, payment: &Payment) -> Result<(), ApiError> {
    if let Some(project_id) = payment.project_id {
        if !claim_project(db, project_id, &payment.order_id).await? {
            error!(
                "Project {} was already paid; {} settled but not credited",
                project_id.to_hex(),
                payment.order_id
            );
            return Ok(());
        }
    }

    let users = db.collection::<User>(USERS);
    let (filter, update) = credit_update(payment);
    if users.update_one(filter, update, None).await?.modified_count == 0 {
        return Ok(());
    }
    info!("Credited {} to payee of {}", payment.amount, payment.order_id);

    match users.find_one(doc! { "_id": payment.payer_id }, None).await {
        Ok(Some(payer)) => {
            let (order_id, amount, item) =
                (payment.order_id.clone(), payment.amount, payment.description.clone());
            tokio::spawn(async move {
                EmailService::send_payment_receipt(&payer.email, &order_id, amount, &item).await;
            });
        }
        Ok(None) => {}
        Err(e) => warn!("No receipt for {}: {}", payment.order_id, e),
    }
    Ok(())
}

async fn debit_payee(db: &DbConn, payment: &Payment) -> Result<(), ApiError> {
    let (filter, update) = debit_update(payment);
    if db.collection::<User>(USERS).update_one(filter, update, None).await?.modified_count == 1 {
        info!("Debited {} from payee of {}", payment.amount, payment.order_id);
    }

    if let Some(project_id) = payment.project_id {
        db.collection::<Project>(PROJECTS)
            .update_one(
                doc! { "_id": project_id, "paid_order_id": &payment.order_id },
                doc! { "$unset": { "paid_order_id": "" } },
                None,
            )
            .await?;
    }
    Ok(())
}

/// Moves a stored payment to the status Midtrans reports, if the move is
/// allowed. The status update only matches the status we read and the
/// balance writes are keyed by order id, so repeated or concurrent
/// deliveries of the same notification settle once.
async fn apply_transition(db: &DbConn, report: &TransactionNotification) -> Result<Payment, ApiError> {
    let payments = db.collection::<Payment>(PAYMENTS);
    let payment = payments
        .find_one(doc! { "order_id": &report.order_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Payment not found"))?;

    let Some(next) = MidtransService::map_status(&report.transaction_status, report.fraud_status.as_deref()) else {
        info!(
            "Ignoring Midtrans status '{}' for {}",
            report.transaction_status, payment.order_id
        );
        return Ok(payment);
    };

    let Some(plan) = settlement(payment.status, next) else {
        warn!(
            "Refusing {} -> {} for {}",
            payment.status.as_str(),
            next.as_str(),
            payment.order_id
        );
        return Ok(payment);
    };
    if !amount_matches(&report.gross_amount, payment.amount) {
        return Err(ApiError::bad_request("Gross amount does not match the payment"));
    }

    let payment = if plan.advance {
        let mut set = doc! { "status": next.as_str(), "updated_at": DateTime::now() };
        if let Some(ref payment_type) = report.payment_type {
            set.insert("payment_type", payment_type);
        }
        if let Some(ref transaction_id) = report.transaction_id {
            set.insert("transaction_id", transaction_id);
        }

        let updated = payments
            .update_one(
                doc! { "order_id": &payment.order_id, "status": payment.status.as_str() },
                doc! { "$set": set },
                None,
            )
            .await?;

        if updated.modified_count == 0 {
            // Another delivery got there first; report what is stored now.
            return payments
                .find_one(doc! { "order_id": &payment.order_id }, None)
                .await?
                .ok_or_else(|| ApiError::not_found("Payment not found"));
        }

        info!(
            "Payment {} moved {} -> {}",
            payment.order_id,
            payment.status.as_str(),
            next.as_str()
        );

        Payment {
            status: next,
            payment_type: report.payment_type.clone().or(payment.payment_type),
            transaction_id: report.transaction_id.clone().or(payment.transaction_id),
            updated_at: DateTime::now(),
            ..payment
        }
    } else {
        payment
    };

    match plan.ledger {
        Ledger::Credit => credit_payee(db, &payment).await?,
        Ledger::Debit => debit_payee(db, &payment).await?,
        Ledger::Nothing => {}
    }

    Ok(payment)
}

/// Start a Midtrans checkout for a project or a service
#[openapi(tag = "Payment")]
#[post("/payments", data = "<dto>")]
pub async fn create_payment(db: &State<DbConn>, client: ClientGuard, dto: Json<CreatePaymentDto>) -> ApiResult {
    dto.validate()?;
    let payer_id = client.auth.user_id;

    let checkout = match (&dto.project_id, &dto.service_id) {
        (Some(project_id), None) => {
            project_checkout(db, payer_id, parse_object_id(project_id, "project")?).await?
        }
        (None, Some(service_id)) => {
            service_checkout(db, payer_id, parse_object_id(service_id, "service")?).await?
        }
        _ => return Err(ApiError::bad_request("Exactly one of project_id or service_id is required")),
    };

    let payer = db
        .collection::<User>(USERS)
        .find_one(doc! { "_id": payer_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let order_id = new_order_id();
    let snap = MidtransService::create_transaction(ChargeRequest {
        order_id: &order_id,
        amount: MidtransService::gross_amount(checkout.amount),
        item_id: &checkout.item_id,
        item_name: &checkout.description,
        customer_name: &payer.name,
        customer_email: &payer.email,
    })
    .await?;

    let now = DateTime::now();
    let mut payment = Payment {
        id: None,
        order_id,
        payer_id,
        payee_id: checkout.payee_id,
        project_id: checkout.project_id,
        service_id: checkout.service_id,
        description: checkout.description,
        amount: checkout.amount,
        status: PaymentStatus::Pending,
        snap_token: Some(snap.token.clone()),
        redirect_url: Some(snap.redirect_url.clone()),
        payment_type: None,
        transaction_id: None,
        created_at: now,
        updated_at: now,
    };

    let result = db.collection::<Payment>(PAYMENTS).insert_one(&payment, None).await?;
    payment.id = result.inserted_id.as_object_id();

    info!("Created payment {} for {}", payment.order_id, payer.email);

    Ok(Json(ApiResponse::success_with_message(
        "Payment created",
        serde_json::json!({
            "payment": PaymentResponse::from(payment),
            "snap_token": snap.token,
            "redirect_url": snap.redirect_url,
            "client_key": Config::midtrans_client_key(),
        }),
    )))
}

/// Midtrans HTTP notification webhook
#[openapi(tag = "Payment")]
#[post("/payments/notification", data = "<notification>")]
pub async fn notification(db: &State<DbConn>, notification: Json<TransactionNotification>) -> ApiResult {
    if !MidtransService::verify_signature(&notification)? {
        warn!("Rejected notification with bad signature for {}", notification.order_id);
        return Err(ApiError::forbidden("Invalid signature"));
    }

    let payment = apply_transition(db, &notification).await.map_err(|e| {
        error!("Notification for {} failed: {}", notification.order_id, e.message);
        e
    })?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "order_id": payment.order_id,
        "status": payment.status,
    }))))
}

/// Re-check a payment against the Midtrans Core API
#[openapi(tag = "Payment")]
#[get("/payments/<order_id>/status")]
pub async fn payment_status(db: &State<DbConn>, auth: AuthGuard, order_id: String) -> ApiResult {
    let payment = db
        .collection::<Payment>(PAYMENTS)
        .find_one(doc! { "order_id": &order_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Payment not found"))?;

    if payment.payer_id != auth.user_id && payment.payee_id != auth.user_id {
        return Err(ApiError::forbidden("Not a party to this payment"));
    }

    let report = MidtransService::transaction_status(&order_id).await?;
    let payment = apply_transition(db, &report).await?;

    Ok(Json(ApiResponse::success(serde_json::json!(PaymentResponse::from(payment)))))
}

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct PaymentQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[openapi(tag = "Payment")]
#[get("/payments?<query..>")]
pub async fn list_payments(db: &State<DbConn>, auth: AuthGuard, query: PaymentQuery) -> ApiResult {
    let paging = Pagination::new(query.page, query.limit);

    let mut filter = doc! {
        "$or": [ { "payer_id": auth.user_id }, { "payee_id": auth.user_id } ]
    };
    if let Some(ref status) = query.status {
        let status = PaymentStatus::parse(status)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown payment status '{}'", status)))?;
        filter.insert("status", status.as_str());
    }

    let find_options = FindOptions::builder()
        .skip(paging.skip())
        .limit(paging.limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let collection = db.collection::<Payment>(PAYMENTS);
    let payments: Vec<PaymentResponse> = collection
        .find(filter.clone(), find_options)
        .await?
        .try_collect::<Vec<Payment>>()
        .await?
        .into_iter()
        .map(PaymentResponse::from)
        .collect();

    let total = collection.count_documents(filter, None).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "payments": payments,
        "pagination": paging.meta(total),
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_are_unique_and_prefixed() {
        let (a, b) = (new_order_id(), new_order_id());
        assert!(a.starts_with("ORDER-"));
        assert_eq!(a.len(), "ORDER-".len() + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn gross_amount_comparison() {
        assert!(amount_matches("150000.00", 150_000.0));
        assert!(amount_matches(" 150000 ", 150_000.4));
        assert!(!amount_matches("150001.00", 150_000.0));
        assert!(!amount_matches("abc", 150_000.0));
    }

    fn payment(status: PaymentStatus) -> Payment {
        let now = DateTime::now();
        Payment {
            id: Some(ObjectId::new()),
            order_id: new_order_id(),
            payer_id: ObjectId::new(),
            payee_id: ObjectId::new(),
            project_id: None,
            service_id: Some(ObjectId::new()),
            description: "Service: Logo".into(),
            amount: 250_000.0,
            status,
            snap_token: None,
            redirect_url: None,
            payment_type: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn project_takes_one_payment_at_a_time() {
        assert!(refuse_second_payment(None).is_ok());

        let pending = payment(PaymentStatus::Pending);
        let err = refuse_second_payment(Some(&pending)).unwrap_err();
        assert_eq!(err.status, rocket::http::Status::Conflict);
        assert!(err.message.contains(&pending.order_id));

        let paid = payment(PaymentStatus::Success);
        let err = refuse_second_payment(Some(&paid)).unwrap_err();
        assert_eq!(err.message, "Project has already been paid");
    }

    #[test]
    fn settling_credits_and_refunding_debits() {
        use PaymentStatus::*;
        assert_eq!(settlement(Pending, Success), Some(Settlement { advance: true, ledger: Ledger::Credit }));
        assert_eq!(settlement(Success, Refunded), Some(Settlement { advance: true, ledger: Ledger::Debit }));
        assert_eq!(settlement(Pending, Expired), Some(Settlement { advance: true, ledger: Ledger::Nothing }));
        assert_eq!(settlement(Pending, Failed), Some(Settlement { advance: true, ledger: Ledger::Nothing }));
    }

    #[test]
    fn repeated_reports_only_finish_the_ledger() {
        use PaymentStatus::*;
        assert_eq!(settlement(Success, Success), Some(Settlement { advance: false, ledger: Ledger::Credit }));
        assert_eq!(settlement(Refunded, Refunded), Some(Settlement { advance: false, ledger: Ledger::Debit }));
        assert_eq!(settlement(Pending, Pending), Some(Settlement { advance: false, ledger: Ledger::Nothing }));
    }

    #[test]
    fn backwards_moves_are_refused() {
        use PaymentStatus::*;
        assert_eq!(settlement(Success, Pending), None);
        assert_eq!(settlement(Success, Failed), None);
        assert_eq!(settlement(Refunded, Success), None);
        assert_eq!(settlement(Expired, Success), None);
        assert_eq!(settlement(Pending, Refunded), None);
    }

    #[test]
    fn credit_is_keyed_by_order() {
        let p = payment(PaymentStatus::Success);
        let (filter, update) = credit_update(&p);
        assert_eq!(filter.get_object_id("_id").unwrap(), p.payee_id);
        assert_eq!(
            filter.get_document("credited_orders").unwrap().get_str("$ne").unwrap(),
            p.order_id
        );
        assert_eq!(update.get_document("$inc").unwrap().get_f64("balance").unwrap(), 250_000.0);
        assert_eq!(update.get_document("$push").unwrap().get_str("credited_orders").unwrap(), p.order_id);
    }

    #[test]
    fn debit_only_matches_a_credited_order() {
        let p = payment(PaymentStatus::Refunded);
        let (filter, update) = debit_update(&p);
        assert_eq!(filter.get_str("credited_orders").unwrap(), p.order_id);
        assert_eq!(update.get_document("$inc").unwrap().get_f64("balance").unwrap(), -250_000.0);
        assert_eq!(update.get_document("$pull").unwrap().get_str("credited_orders").unwrap(), p.order_id);
    }
}
