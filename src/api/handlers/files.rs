use crate::{
    AppState,
    types::{
        AppError, FileListResponse, KnowledgeBaseListResponse, KnowledgeBaseQuery,
        MessageResponse, Result, UploadResponse,
    },
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
};

/// List documents in the document root or a knowledge base
#[utoipa::path(
    get,
    path = "/files",
    params(KnowledgeBaseQuery),
    responses(
        (status = 200, description = "Document names", body = FileListResponse),
        (status = 400, description = "Invalid knowledge base name")
    ),
    tag = "documents"
)]
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<KnowledgeBaseQuery>,
) -> Result<Json<FileListResponse>> {
    let files = state.documents.list(query.knowledge_base.as_deref()).await?;
    Ok(Json(FileListResponse { files }))
}

/// Upload a document
///
/// Multipart form with a `file` part and an optional `knowledge_base` text
/// part. Without a knowledge base the file goes to the document root.
#[utoipa::path(
    post,
    path = "/upload",
    request_body(content_type = "multipart/form-data", description = "`file` and optional `knowledge_base`"),
    responses(
        (status = 200, description = "Stored", body = UploadResponse),
        (status = 400, description = "Missing file or invalid name")
    ),
    tag = "documents"
)]
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut knowledge_base: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::Validation("file part has no file name".to_string()))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("knowledge_base") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid knowledge_base: {}", e)))?;
                knowledge_base = Some(value);
            }
            _ => {}
        }
    }

    let (filename, contents) =
        file.ok_or_else(|| AppError::Validation("missing 'file' part".to_string()))?;
    let path = state
        .documents
        .upload(&filename, &contents, knowledge_base.as_deref())
        .await?;

    Ok(Json(UploadResponse {
        filename,
        path: path.display().to_string(),
    }))
}

/// Delete a document
#[utoipa::path(
    delete,
    path = "/files/{filename}",
    params(
        ("filename" = String, Path, description = "Document name"),
        KnowledgeBaseQuery
    ),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 404, description = "No such file")
    ),
    tag = "documents"
)]
pub async fn delete_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<KnowledgeBaseQuery>,
) -> Result<Json<MessageResponse>> {
    state
        .documents
        .delete(&filename, query.knowledge_base.as_deref())
        .await?;
    Ok(Json(MessageResponse {
        message: "File deleted successfully".to_string(),
    }))
}

/// List knowledge bases
#[utoipa::path(
    get,
    path = "/knowledge-bases",
    responses((status = 200, description = "Knowledge base names", body = KnowledgeBaseListResponse)),
    tag = "documents"
)]
pub async fn list_knowledge_bases(
    State(state): State<AppState>,
) -> Result<Json<KnowledgeBaseListResponse>> {
    let knowledge_bases = state.documents.list_knowledge_bases().await?;
    Ok(Json(KnowledgeBaseListResponse { knowledge_bases }))
}
