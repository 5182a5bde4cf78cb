use axum::{
    body::Bytes,
    extract::{Multipart, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::documents::{
    candidate_ids, entry_id, history_categories, plan_upload, AudioEntry, Library, HISTORY_LIST,
    MEANDERING_LIST,
};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiMultipart, ApiQuery};
use crate::AppState;

const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "wav", "m4a", "ogg"];
const MP3_CONTENT_TYPE: &str = "audio/mpeg";

fn is_audio(key: &str) -> bool {
    key.rsplit_once('.')
        .is_some_and(|(_, ext)| AUDIO_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
}

fn required(value: Option<String>, what: &str) -> ApiResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::bad_request(format!("{} is required", what))),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub updated: String,
    pub url: String,
}

pub async fn list_files(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let files: Vec<FileInfo> = state
        .blobs
        .list("")
        .await?
        .into_iter()
        .filter(|meta| is_audio(&meta.key))
        .map(|meta| FileInfo {
            url: state.blobs.public_url(&meta.key),
            name: meta.key,
            size: meta.size,
            content_type: meta.content_type,
            updated: meta.updated,
        })
        .collect();
    Ok(Json(json!({ "files": files })))
}

#[derive(Default)]
struct UploadForm {
    file: Option<(String, Bytes)>,
    title: Option<String>,
    folder: Option<String>,
    gender: Option<String>,
    topic: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Multipart error: {}", e)))?;
        let Some(field) = field else { break };

        let name = field.name().unwrap_or("").to_string();
        tracing::debug!("Multipart field: {}", name);
        if name == "file" {
            let file_name = field.file_name().unwrap_or("").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?;
            form.file = Some((file_name, data));
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(format!("Multipart error: {}", e)))?;
        match name.as_str() {
            "title" => form.title = Some(text),
            "folder" => form.folder = Some(text),
            "gender" => form.gender = Some(text),
            "topic" => form.topic = Some(text),
            _ => {}
        }
    }
    Ok(form)
}

/// Stores an MP3 under its library's naming rule and lists it.
pub async fn upload_file(
    State(state): State<AppState>,
    ApiMultipart(multipart): ApiMultipart,
) -> ApiResult<Json<Value>> {
    let form = read_upload_form(multipart).await?;
    let Some((original_name, data)) = form.file else {
        return Err(ApiError::bad_request("No file provided"));
    };
    let title = required(form.title, "Title")?;
    if !original_name.to_ascii_lowercase().ends_with(".mp3") {
        return Err(ApiError::bad_request("Only MP3 files are allowed"));
    }

    let library = Library::from_folder(form.folder.as_deref());
    let document = library.document();

    let _guard = state.documents.lock().await;
    let existing = state.documents.read_audio_list(document).await?;
    let plan = plan_upload(
        library,
        existing.as_ref(),
        &title,
        form.gender.as_deref(),
        form.topic.as_deref(),
    );

    let size = data.len() as u64;
    state.blobs.put(&plan.upload_path, data, MP3_CONTENT_TYPE).await?;
    state.blobs.make_public(&plan.upload_path).await?;

    let mut list = existing.unwrap_or_default();
    list.audios.push(plan.entry.clone());
    state.documents.write_audio_list(document, &list).await?;
    tracing::info!("Uploaded {} as {} ({} bytes)", original_name, plan.upload_path, size);

    Ok(Json(json!({
        "message": "File uploaded successfully",
        "file": {
            "name": plan.upload_path,
            "size": size,
            "contentType": MP3_CONTENT_TYPE,
            "url": state.blobs.public_url(&plan.upload_path),
        },
        "jsonEntry": plan.entry,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlRequest {
    pub folder: Option<String>,
    pub title: Option<String>,
    pub gender: Option<String>,
    pub topic: Option<String>,
}

/// Reserves a name for a direct upload. The list is only updated once the
/// client confirms through `update-json`.
pub async fn signed_url(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SignedUrlRequest>,
) -> ApiResult<Json<Value>> {
    let title = required(request.title, "Title")?;
    let library = Library::from_folder(request.folder.as_deref());
    let existing = state.documents.read_audio_list(library.document()).await?;
    let plan = plan_upload(
        library,
        existing.as_ref(),
        &title,
        request.gender.as_deref(),
        request.topic.as_deref(),
    );

    let signed = state.signer.sign(&plan.upload_path, "PUT", chrono::Utc::now());
    Ok(Json(json!({
        "signedUrl": signed.url,
        "uploadPath": plan.upload_path,
        "fileName": plan.file_name,
        "id": plan.id,
        "publicUrl": state.blobs.public_url(&plan.upload_path),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJsonRequest {
    pub folder: Option<String>,
    pub title: Option<String>,
    pub gender: Option<String>,
    pub topic: Option<String>,
    pub id: Option<String>,
    pub upload_path: Option<String>,
    pub voice_name: Option<String>,
    pub is_new: Option<bool>,
}

/// Publishes a completed signed upload and appends its list entry.
pub async fn update_json(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<UpdateJsonRequest>,
) -> ApiResult<Json<Value>> {
    let (Some(id), Some(upload_path)) = (request.id, request.upload_path) else {
        return Err(ApiError::bad_request("ID and upload path are required"));
    };

    state.blobs.make_public(&upload_path).await?;

    let library = Library::from_folder(request.folder.as_deref());
    let entry = match library {
        Library::History => AudioEntry {
            id,
            title: request.title,
            voice: request.voice_name,
            is_new: request.is_new,
            ..AudioEntry::default()
        },
        Library::Meandering => AudioEntry {
            id,
            topic: Some(request.topic.unwrap_or_else(|| "boring".to_string())),
            subtopic: request.title,
            gender: Some(request.gender.unwrap_or_else(|| "female".to_string())),
            ..AudioEntry::default()
        },
    };

    let _guard = state.documents.lock().await;
    let mut list = state
        .documents
        .read_audio_list(library.document())
        .await?
        .unwrap_or_default();
    list.audios.push(entry.clone());
    state.documents.write_audio_list(library.document(), &list).await?;
    tracing::info!("Registered {} in {}", entry.id, library.document());

    Ok(Json(json!({ "message": "JSON updated successfully", "jsonEntry": entry })))
}

/// Applies `edit` to the History entry named by `file_name`.
async fn edit_history_entry<F>(
    state: &AppState,
    file_name: Option<String>,
    with_categories: bool,
    edit: F,
) -> ApiResult<AudioEntry>
where
    F: FnOnce(&mut AudioEntry),
{
    let file_name = required(file_name, "File name")?;
    let id = entry_id(&file_name);

    let _guard = state.documents.lock().await;
    let Some(mut list) = state.documents.read_audio_list(HISTORY_LIST).await? else {
        return Err(ApiError::not_found("JSON file not found"));
    };
    let Some(entry) = list.find_mut(id) else {
        return Err(ApiError::not_found(format!("Audio entry {} not found", id)));
    };
    edit(entry);
    let updated = entry.clone();

    if with_categories {
        list.categories = Some(history_categories());
    }
    state.documents.write_audio_list(HISTORY_LIST, &list).await?;
    Ok(updated)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCategoryRequest {
    pub file_name: Option<String>,
    pub category: Option<String>,
}

pub async fn update_category(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<UpdateCategoryRequest>,
) -> ApiResult<Json<Value>> {
    let category = request.category.filter(|c| !c.is_empty());
    let entry = edit_history_entry(&state, request.file_name, true, |entry| entry.category = category).await?;
    Ok(Json(json!({ "message": "Category updated successfully", "entry": entry })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleNewRequest {
    pub file_name: Option<String>,
    #[serde(default)]
    pub is_new: bool,
}

pub async fn toggle_new(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ToggleNewRequest>,
) -> ApiResult<Json<Value>> {
    let is_new = request.is_new;
    edit_history_entry(&state, request.file_name, false, |entry| entry.is_new = Some(is_new)).await?;
    Ok(Json(json!({ "message": "New status updated successfully", "isNew": is_new })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateImageRequest {
    pub file_name: Option<String>,
    pub image_url: Option<String>,
}

pub async fn update_image(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<UpdateImageRequest>,
) -> ApiResult<Json<Value>> {
    let image_url = request.image_url.filter(|u| !u.is_empty());
    let stored = image_url.clone();
    edit_history_entry(&state, request.file_name, false, |entry| entry.image_url = stored).await?;
    Ok(Json(json!({ "success": true, "imageUrl": image_url })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    pub file_name: Option<String>,
}

/// Deletes a recording and drops its entry from whichever list holds it.
pub async fn delete_file(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DeleteQuery>,
) -> ApiResult<Json<Value>> {
    let key = required(query.file_name, "File name")?;
    state.blobs.delete(&key).await?;

    let ids = candidate_ids(&key);
    let _guard = state.documents.lock().await;
    for document in [HISTORY_LIST, MEANDERING_LIST] {
        let Some(mut list) = state.documents.read_audio_list(document).await? else {
            continue;
        };
        let removed = list.remove_ids(&ids);
        if removed > 0 {
            state.documents.write_audio_list(document, &list).await?;
            tracing::info!("Removed {} entr(ies) for {} from {}", removed, key, document);
        }
    }

    Ok(Json(json!({ "message": format!("Deleted {}", key) })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_extensions_are_case_insensitive() {
        assert!(is_audio("boringhistory/HIST001.MP3"));
        assert!(is_audio("a.ogg"));
        assert!(!is_audio("history-audio-list.json"));
        assert!(!is_audio("mp3"));
    }
}
