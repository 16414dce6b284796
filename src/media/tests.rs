use super::compress::{compress, MAX_DIMENSION, TARGET_BYTES};
use super::signature::sign_params;
use super::*;
use crate::store::auto_id;
use httpmock::prelude::*;
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageFormat, Rgb};
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::PathBuf;

fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let buffer = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(buffer)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

fn png(width: u32, height: u32) -> Vec<u8> {
    encoded(width, height, ImageFormat::Png)
}

fn temp_cache_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("roomchat-test-{}", auto_id()))
        .join("uploads.json")
}

fn cloudinary() -> CloudinaryConfig {
    CloudinaryConfig {
        cloud_name: "demo".into(),
        api_key: "123".into(),
        api_secret: Some("secret".into()),
        upload_preset: "chat".into(),
        signer_url: None,
    }
}

#[test]
fn test_validate() {
    assert!(matches!(
        validate(b"abc", "text/plain", 10),
        Err(MediaError::NotAnImage(t)) if t == "text/plain"
    ));
    assert!(matches!(
        validate(&[0u8; 11], "image/png", 10),
        Err(MediaError::TooLarge { size: 11, limit: 10 })
    ));
    assert!(validate(&[0u8; 10], "image/png", 10).is_ok());
}

#[test]
fn test_signature_known_vectors() {
    let signer = UploadSigner::new("secret", "chat");
    assert_eq!(
        signer.sign_at(None, 1_700_000_000).signature,
        "3d7416ff10ef67f70e3dc49791bf196558271eff272903214dcb26d84c117c5c"
    );
    assert_eq!(
        signer.sign_at(Some("avatars"), 1_700_000_000).signature,
        "4df6f4c59f0b7383a20426dca6f837918ec03823e2c025da68cc0436a674c37e"
    );
}

#[test]
fn test_signature_ignores_empty_values_and_is_deterministic() {
    let mut params = BTreeMap::new();
    params.insert("upload_preset", "chat".to_string());
    params.insert("timestamp", "1700000000".to_string());
    params.insert("folder", String::new());
    let first = sign_params(&params, "secret");
    assert_eq!(first, sign_params(&params, "secret"));
    assert_eq!(
        first,
        "3d7416ff10ef67f70e3dc49791bf196558271eff272903214dcb26d84c117c5c"
    );
}

#[test]
fn test_content_hash() {
    assert_eq!(
        content_hash(b"hello"),
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
}

#[test]
fn test_small_image_is_left_alone() {
    let bytes = png(64, 32);
    let out = compress(&bytes, "image/png").unwrap();
    assert_eq!(out.bytes, bytes);
    assert_eq!(out.content_type, "image/png");
}

#[test]
fn test_large_image_is_resized_to_jpeg() {
    let bytes = png(2048, 1536);
    let out = compress(&bytes, "image/png").unwrap();
    assert_eq!(out.content_type, "image/jpeg");
    assert!(out.bytes.len() <= TARGET_BYTES);

    let decoded = image::load_from_memory(&out.bytes).unwrap();
    assert_eq!(decoded.dimensions(), (MAX_DIMENSION, 768));
}

#[tokio::test]
async fn test_cache_persists_entries() {
    let path = temp_cache_path();
    let cache = UploadCache::open(&path).await.unwrap();
    assert_eq!(cache.get("abc"), None);

    cache.insert("abc", "https://img/abc.jpg").await.unwrap();
    let reopened = UploadCache::open(&path).await.unwrap();
    assert_eq!(reopened.get("abc").as_deref(), Some("https://img/abc.jpg"));
    assert_eq!(reopened.path(), path.as_path());
}

#[test]
fn test_small_gif_and_bmp_are_left_alone() {
    let gif = encoded(4, 4, ImageFormat::Gif);
    let out = compress(&gif, "image/gif").unwrap();
    assert_eq!(out.bytes, gif);
    assert_eq!(out.content_type, "image/gif");

    let bmp = encoded(4, 4, ImageFormat::Bmp);
    assert_eq!(compress(&bmp, "image/bmp").unwrap().bytes, bmp);
}

#[test]
fn test_small_undecodable_image_passes_through() {
    let out = compress(b"\x00\x00\x01\x00icon", "image/x-icon").unwrap();
    assert_eq!(out.bytes, b"\x00\x00\x01\x00icon");
    assert_eq!(out.content_type, "image/x-icon");

    let large = vec![7u8; TARGET_BYTES + 1];
    assert!(matches!(
        compress(&large, "image/x-icon"),
        Err(MediaError::Image(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cache_inserts_all_persist() {
    let path = temp_cache_path();
    let cache = Arc::new(UploadCache::open(&path).await.unwrap());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .insert(&format!("hash-{}", i), &format!("https://img/{}.jpg", i))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let reopened = UploadCache::open(&path).await.unwrap();
    for i in 0..16 {
        assert_eq!(
            reopened.get(&format!("hash-{}", i)),
            Some(format!("https://img/{}.jpg", i))
        );
    }
}

#[tokio::test]
async fn test_upload_small_gif() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1_1/demo/image/upload")
            .body_includes("Content-Type: image/gif");
        then.status(200)
            .json_body(json!({ "secure_url": "https://res.example.com/demo/g.gif" }));
    });

    let uploader = ImageUploader::new(
        &cloudinary(),
        Arc::new(UploadSigner::new("secret", "chat")),
        UploadCache::open(temp_cache_path()).await.unwrap(),
    )
    .with_upload_base(server.url("/v1_1"));

    let url = uploader
        .upload(&encoded(2, 2, ImageFormat::Gif), "image/gif", None)
        .await
        .unwrap();
    assert_eq!(url, "https://res.example.com/demo/g.gif");
    mock.assert();
}

#[tokio::test]
async fn test_upload_deduplicates_identical_bytes() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1_1/demo/image/upload")
            .header_exists("content-type")
            .body_includes("name=\"upload_preset\"\r\n\r\nchat")
            .body_includes("name=\"api_key\"\r\n\r\n123")
            .body_includes("name=\"folder\"\r\n\r\navatars")
            .body_includes("name=\"signature\"");
        then.status(200)
            .json_body(json!({ "secure_url": "https://res.example.com/demo/a.png" }));
    });

    let cache = UploadCache::open(temp_cache_path()).await.unwrap();
    let uploader = ImageUploader::new(
        &cloudinary(),
        Arc::new(UploadSigner::new("secret", "chat")),
        cache,
    )
    .with_upload_base(server.url("/v1_1"));

    let bytes = png(16, 16);
    let first = uploader.upload(&bytes, "image/png", Some("avatars")).await.unwrap();
    let second = uploader.upload(&bytes, "image/png", Some("avatars")).await.unwrap();

    assert_eq!(first, "https://res.example.com/demo/a.png");
    assert_eq!(second, first);
    mock.assert();
}

#[tokio::test]
async fn test_upload_surfaces_provider_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1_1/demo/image/upload");
        then.status(400)
            .json_body(json!({ "error": { "message": "Invalid Signature" } }));
    });

    let uploader = ImageUploader::new(
        &cloudinary(),
        Arc::new(UploadSigner::new("wrong", "chat")),
        UploadCache::open(temp_cache_path()).await.unwrap(),
    )
    .with_upload_base(server.url("/v1_1"));

    let err = uploader.upload(&png(8, 8), "image/png", None).await.unwrap_err();
    assert!(matches!(err, MediaError::Upload(m) if m == "Invalid Signature"));
}

#[tokio::test]
async fn test_upload_rejects_non_images_before_contacting_host() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST);
        then.status(200);
    });

    let uploader = ImageUploader::new(
        &cloudinary(),
        Arc::new(UploadSigner::new("secret", "chat")),
        UploadCache::open(temp_cache_path()).await.unwrap(),
    )
    .with_upload_base(server.url("/v1_1"))
    .with_max_bytes(1024);

    let err = uploader.upload(b"%PDF", "application/pdf", None).await.unwrap_err();
    assert!(matches!(err, MediaError::NotAnImage(_)));
    let err = uploader.upload(&[0u8; 2048], "image/png", None).await.unwrap_err();
    assert!(matches!(err, MediaError::TooLarge { .. }));
    mock.assert_calls(0);
}

#[tokio::test]
async fn test_remote_signer() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/sign-cloudinary")
            .json_body(json!({ "folder": "rooms" }));
        then.status(200)
            .json_body(json!({ "signature": "abc", "timestamp": 1700000000 }));
    });

    let signer = RemoteSigner::new(server.url("/api/sign-cloudinary"));
    let signed = signer.sign(Some("rooms")).await.unwrap();
    assert_eq!(
        signed,
        SignedUpload {
            signature: "abc".into(),
            timestamp: 1_700_000_000
        }
    );
    mock.assert();
}
