//! `blog.BlogService` handlers.
//!
//! Handlers share one [`DocumentStore`]; a request with a malformed identifier
//! is rejected before the store is touched.

use crate::server::store::{BlogItem, DocumentId, DocumentStore, StoredBlog};
use bytes::Bytes;
use futures::StreamExt;
use std::{
    io,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tandem::{CallContext, RegistryBuilder, ResponseSink};
use tandem_tonic_core::proto::blog::*;
use tokio::{fs::File, io::AsyncReadExt};
use tonic::Status;

#[derive(Clone)]
pub struct BlogSettings {
    pub store: Arc<dyn DocumentStore>,
    /// Root `DownloadImage` serves from.
    pub assets_dir: PathBuf,
    pub chunk_bytes: usize,
}

pub fn register(builder: RegistryBuilder, settings: BlogSettings) -> RegistryBuilder {
    let store = &settings.store;
    builder
        .unary(CREATE_BLOG, {
            let store = Arc::clone(store);
            move |_ctx, req| create_blog(Arc::clone(&store), req)
        })
        .unary(READ_BLOG, {
            let store = Arc::clone(store);
            move |_ctx, req| read_blog(Arc::clone(&store), req)
        })
        .unary(UPDATE_BLOG, {
            let store = Arc::clone(store);
            move |_ctx, req| update_blog(Arc::clone(&store), req)
        })
        .unary(DELETE_BLOG, {
            let store = Arc::clone(store);
            move |_ctx, req| delete_blog(Arc::clone(&store), req)
        })
        .server_streaming(LIST_BLOG, {
            let store = Arc::clone(store);
            move |_ctx, req, sink| list_blog(Arc::clone(&store), req, sink)
        })
        .server_streaming(DOWNLOAD_IMAGE, {
            let assets_dir = settings.assets_dir.clone();
            let chunk_bytes = settings.chunk_bytes.max(1);
            move |ctx, req, sink| download_image(ctx, assets_dir.clone(), chunk_bytes, req, sink)
        })
}

fn parse_id(raw: &str) -> Result<DocumentId, Status> {
    raw.parse::<DocumentId>()
        .map_err(|e| Status::invalid_argument(e.to_string()))
}

fn require(blog: Option<Blog>) -> Result<Blog, Status> {
    blog.ok_or_else(|| Status::invalid_argument("Request is missing a blog"))
}

fn to_item(blog: Blog) -> BlogItem {
    BlogItem {
        author_id: blog.author_id,
        title: blog.title,
        content: blog.content,
    }
}

fn to_proto(stored: StoredBlog) -> Blog {
    Blog {
        id: stored.id.to_string(),
        author_id: stored.item.author_id,
        title: stored.item.title,
        content: stored.item.content,
    }
}

async fn create_blog(
    store: Arc<dyn DocumentStore>,
    req: CreateBlogRequest,
) -> Result<CreateBlogResponse, Status> {
    tracing::info!("Create blog request");
    let stored = store.insert(to_item(require(req.blog)?)).await?;
    Ok(CreateBlogResponse {
        blog: Some(to_proto(stored)),
    })
}

async fn read_blog(
    store: Arc<dyn DocumentStore>,
    req: ReadBlogRequest,
) -> Result<ReadBlogResponse, Status> {
    tracing::info!("Read blog request");
    let id = parse_id(&req.blog_id)?;
    let stored = store.find(id).await?;
    Ok(ReadBlogResponse {
        blog: Some(to_proto(stored)),
    })
}

async fn update_blog(
    store: Arc<dyn DocumentStore>,
    req: UpdateBlogRequest,
) -> Result<UpdateBlogResponse, Status> {
    tracing::info!("Update blog request");
    let blog = require(req.blog)?;
    let id = parse_id(&blog.id)?;
    let stored = store.replace(id, to_item(blog)).await?;
    Ok(UpdateBlogResponse {
        blog: Some(to_proto(stored)),
    })
}

async fn delete_blog(
    store: Arc<dyn DocumentStore>,
    req: DeleteBlogRequest,
) -> Result<DeleteBlogResponse, Status> {
    tracing::info!("Delete blog request");
    let id = parse_id(&req.blog_id)?;
    store.delete(id).await?;
    Ok(DeleteBlogResponse {
        blog_id: req.blog_id,
    })
}

async fn list_blog(
    store: Arc<dyn DocumentStore>,
    _req: ListBlogRequest,
    mut sink: ResponseSink<ListBlogResponse>,
) -> Result<(), Status> {
    tracing::info!("List blog request");
    let mut cursor = store.list().await?;
    while let Some(stored) = cursor.next().await {
        sink.send(ListBlogResponse {
            blog: Some(to_proto(stored?)),
        })
        .await?;
    }
    Ok(())
}

/// Resolves `file_name` under `root`, refusing anything that could escape it.
fn confine(root: &Path, file_name: &str) -> Result<PathBuf, Status> {
    let relative = Path::new(file_name);
    let plain = !file_name.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !plain {
        return Err(Status::invalid_argument(format!(
            "Invalid file name: {file_name:?}"
        )));
    }
    Ok(root.join(relative))
}

/// Fills `buf` unless the file ends first; returns how much was read.
async fn read_chunk(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

async fn download_image(
    _ctx: CallContext,
    assets_dir: PathBuf,
    chunk_bytes: usize,
    req: DownloadImageRequest,
    mut sink: ResponseSink<DownloadImageResponse>,
) -> Result<(), Status> {
    tracing::info!("Download image request for {:?}", req.file_name);
    let path = confine(&assets_dir, &req.file_name)?;
    let mut file = File::open(&path).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Status::not_found(format!("File not found: {}", req.file_name)),
        _ => Status::internal(format!("Cannot open {}: {e}", req.file_name)),
    })?;

    let mut buf = vec![0; chunk_bytes];
    loop {
        let read = read_chunk(&mut file, &mut buf)
            .await
            .map_err(|e| Status::internal(format!("Cannot read {}: {e}", req.file_name)))?;
        if read == 0 {
            break;
        }
        sink.send(DownloadImageResponse {
            file_chunk: Bytes::copy_from_slice(&buf[..read]),
        })
        .await?;
        if read < chunk_bytes {
            break;
        }
    }
    tracing::debug!("Sent {} chunks of {:?}", sink.sent(), req.file_name);
    Ok(())
}
