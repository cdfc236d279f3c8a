use std::collections::HashMap;

use mongodb::bson::{doc, from_document, oid::ObjectId, DateTime, Document};
use mongodb::options::FindOptions;
use rocket::futures::TryStreamExt;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;

use crate::db::{DbConn, MESSAGES, USERS};
use crate::guards::AuthGuard;
use crate::models::{conversation_key, Message, MessageResponse, PublicUserResponse, SendMessageDto, User};
use crate::routes::project::PageQuery;
use crate::utils::{parse_object_id, ApiError, ApiResponse, ApiResult, Pagination};

/// The other side of a conversation as seen by `me`.
fn counterpart(message: &Message, me: &ObjectId) -> ObjectId {
    if &message.sender_id == me {
        message.receiver_id
    } else {
        message.sender_id
    }
}

/// Latest message per conversation with an unread count for `user_id`.
fn inbox_pipeline(user_id: ObjectId) -> Vec<Document> {
    vec![
        doc! { "$match": { "$or": [ { "sender_id": user_id }, { "receiver_id": user_id } ] } },
        doc! { "$sort": { "created_at": -1 } },
        doc! {
            "$group": {
                "_id": "$conversation_id",
                "last_message": { "$first": "$$ROOT" },
                "unread": {
                    "$sum": {
                        "$cond": [
                            { "$and": [ { "$eq": [ "$receiver_id", user_id ] }, { "$eq": [ "$read", false ] } ] },
                            1,
                            0
                        ]
                    }
                }
            }
        },
        doc! { "$sort": { "last_message.created_at": -1 } },
    ]
}

#[openapi(tag = "Message")]
#[post("/messages", data = "<dto>")]
pub async fn send_message(db: &State<DbConn>, auth: AuthGuard, dto: Json<SendMessageDto>) -> ApiResult {
    dto.validate()?;
    let dto = dto.into_inner();
    let receiver_id = parse_object_id(&dto.receiver_id, "receiver")?;

    if receiver_id == auth.user_id {
        return Err(ApiError::bad_request("You cannot message yourself"));
    }

    let project_id = match dto.project_id {
        Some(ref id) => Some(parse_object_id(id, "project")?),
        None => None,
    };

    db.collection::<User>(USERS)
        .find_one(doc! { "_id": receiver_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Receiver not found"))?;

    let content = dto.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::bad_request("Message cannot be empty"));
    }

    let mut message = Message {
        id: None,
        conversation_id: conversation_key(&auth.user_id, &receiver_id),
        sender_id: auth.user_id,
        receiver_id,
        content,
        project_id,
        read: false,
        created_at: DateTime::now(),
    };

    let result = db.collection::<Message>(MESSAGES).insert_one(&message, None).await?;
    message.id = result.inserted_id.as_object_id();

    Ok(Json(ApiResponse::success_with_message(
        "Message sent",
        serde_json::json!(MessageResponse::from(message)),
    )))
}

/// One entry per conversation, newest first.
#[openapi(tag = "Message")]
#[get("/messages/inbox")]
pub async fn inbox(db: &State<DbConn>, auth: AuthGuard) -> ApiResult {
    let groups: Vec<Document> = db
        .collection::<Message>(MESSAGES)
        .aggregate(inbox_pipeline(auth.user_id), None)
        .await?
        .try_collect()
        .await?;

    let mut entries = Vec::with_capacity(groups.len());
    for group in groups {
        let last = group
            .get_document("last_message")
            .map_err(|e| ApiError::internal_error(format!("Malformed conversation: {}", e)))?;
        let message: Message = from_document(last.clone())
            .map_err(|e| ApiError::internal_error(format!("Malformed message: {}", e)))?;
        let unread = match group.get("unread") {
            Some(mongodb::bson::Bson::Int32(n)) => *n as i64,
            Some(mongodb::bson::Bson::Int64(n)) => *n,
            _ => 0,
        };
        entries.push((message, unread));
    }

    let participant_ids: Vec<ObjectId> = entries
        .iter()
        .map(|(m, _)| counterpart(m, &auth.user_id))
        .collect();

    let participants: HashMap<ObjectId, User> = db
        .collection::<User>(USERS)
        .find(doc! { "_id": { "$in": participant_ids.clone() } }, None)
        .await?
        .try_collect::<Vec<User>>()
        .await?
        .into_iter()
        .filter_map(|u| u.id.map(|id| (id, u)))
        .collect();

    let conversations: Vec<serde_json::Value> = entries
        .into_iter()
        .map(|(message, unread)| {
            let other = counterpart(&message, &auth.user_id);
            serde_json::json!({
                "conversation_id": message.conversation_id.clone(),
                "participant": participants.get(&other).cloned().map(PublicUserResponse::from),
                "last_message": MessageResponse::from(message),
                "unread": unread,
            })
        })
        .collect();

    Ok(Json(ApiResponse::success(serde_json::json!({
        "conversations": conversations
    }))))
}

/// Messages exchanged with `user_id`, oldest first within the page.
/// Anything addressed to the caller is marked read.
#[openapi(tag = "Message")]
#[get("/messages/conversation/<user_id>?<query..>")]
pub async fn get_conversation(db: &State<DbConn>, auth: AuthGuard, user_id: String, query: PageQuery) -> ApiResult {
    let other_id = parse_object_id(&user_id, "user")?;
    let paging = Pagination::new(query.page, query.limit);
    let filter = doc! { "conversation_id": conversation_key(&auth.user_id, &other_id) };

    let find_options = FindOptions::builder()
        .skip(paging.skip())
        .limit(paging.limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let collection = db.collection::<Message>(MESSAGES);
    let mut messages: Vec<Message> = collection
        .find(filter.clone(), find_options)
        .await?
        .try_collect()
        .await?;
    messages.reverse();

    let total = collection.count_documents(filter.clone(), None).await?;

    let mut unread_filter = filter;
    unread_filter.insert("receiver_id", auth.user_id);
    unread_filter.insert("read", false);
    collection
        .update_many(unread_filter, doc! { "$set": { "read": true } }, None)
        .await?;

    let messages: Vec<MessageResponse> = messages.into_iter().map(MessageResponse::from).collect();

    Ok(Json(ApiResponse::success(serde_json::json!({
        "messages": messages,
        "pagination": paging.meta(total),
    }))))
}

#[openapi(tag = "Message")]
#[patch("/messages/<message_id>/read")]
pub async fn mark_read(db: &State<DbConn>, auth: AuthGuard, message_id: String) -> ApiResult {
    let object_id = parse_object_id(&message_id, "message")?;
    let collection = db.collection::<Message>(MESSAGES);

    let message = collection
        .find_one(doc! { "_id": object_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;

    if message.receiver_id != auth.user_id {
        return Err(ApiError::forbidden("Only the receiver can mark a message as read"));
    }

    collection
        .update_one(doc! { "_id": object_id }, doc! { "$set": { "read": true } }, None)
        .await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Message marked as read"
    }))))
}

#[openapi(tag = "Message")]
#[delete("/messages/<message_id>")]
pub async fn delete_message(db: &State<DbConn>, auth: AuthGuard, message_id: String) -> ApiResult {
    let object_id = parse_object_id(&message_id, "message")?;
    let collection = db.collection::<Message>(MESSAGES);

    let message = collection
        .find_one(doc! { "_id": object_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;

    if message.sender_id != auth.user_id {
        return Err(ApiError::forbidden("Only the sender can delete a message"));
    }

    collection.delete_one(doc! { "_id": object_id }, None).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Message deleted successfully"
    }))))
}
