//! `blog.BlogService`.

use crate::server::ServiceName;
use bytes::Bytes;

pub struct BlogService;

impl ServiceName for BlogService {
    const NAME: &'static str = "blog.BlogService";
}

pub const CREATE_BLOG: &str = "/blog.BlogService/CreateBlog";
pub const READ_BLOG: &str = "/blog.BlogService/ReadBlog";
pub const UPDATE_BLOG: &str = "/blog.BlogService/UpdateBlog";
pub const DELETE_BLOG: &str = "/blog.BlogService/DeleteBlog";
pub const LIST_BLOG: &str = "/blog.BlogService/ListBlog";
pub const DOWNLOAD_IMAGE: &str = "/blog.BlogService/DownloadImage";

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Blog {
    /// 24 hexadecimal characters; empty on create.
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub author_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub title: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub content: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct CreateBlogRequest {
    #[prost(message, optional, tag = "1")]
    pub blog: ::core::option::Option<Blog>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct CreateBlogResponse {
    #[prost(message, optional, tag = "1")]
    pub blog: ::core::option::Option<Blog>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ReadBlogRequest {
    #[prost(string, tag = "1")]
    pub blog_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ReadBlogResponse {
    #[prost(message, optional, tag = "1")]
    pub blog: ::core::option::Option<Blog>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct UpdateBlogRequest {
    #[prost(message, optional, tag = "1")]
    pub blog: ::core::option::Option<Blog>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct UpdateBlogResponse {
    #[prost(message, optional, tag = "1")]
    pub blog: ::core::option::Option<Blog>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct DeleteBlogRequest {
    #[prost(string, tag = "1")]
    pub blog_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct DeleteBlogResponse {
    #[prost(string, tag = "1")]
    pub blog_id: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct ListBlogRequest {}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ListBlogResponse {
    #[prost(message, optional, tag = "1")]
    pub blog: ::core::option::Option<Blog>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct DownloadImageRequest {
    /// Path relative to the server's assets directory.
    #[prost(string, tag = "1")]
    pub file_name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct DownloadImageResponse {
    #[prost(bytes = "bytes", tag = "1")]
    pub file_chunk: Bytes,
}
