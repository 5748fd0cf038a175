//! Uploading election and candidate images to the external image host.

use reqwest::{
    multipart::{Form, Part},
    Client,
};
use rocket::{fs::TempFile, tokio::io::AsyncReadExt};
use serde::Deserialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::mongodb::Id;

/// Where uploaded images go. Lives in managed state.
pub enum ImageHost {
    /// An unsigned-upload endpoint: images are POSTed as multipart `file`
    /// plus `upload_preset`, and the host answers with a `secure_url`.
    Remote {
        client: Client,
        upload_url: String,
        upload_preset: String,
    },
    /// No image host configured. Images are checked but not stored, and a
    /// placeholder reference is recorded instead.
    Offline,
}

/// The part of the image host's answer we need.
#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
}

impl ImageHost {
    pub fn from_config(config: &Config) -> Result<Self> {
        let Some(upload_url) = config.image_upload_url() else {
            warn!("No `image_upload_url` configured; uploaded images will not be stored");
            return Ok(Self::Offline);
        };
        let Some(upload_preset) = config.image_upload_preset() else {
            return Err(Error::Upstream(
                "`image_upload_preset` must be set along with `image_upload_url`".to_string(),
            ));
        };
        Ok(Self::Remote {
            client: Client::builder().build()?,
            upload_url: upload_url.to_string(),
            upload_preset: upload_preset.to_string(),
        })
    }

    /// Check an image against the size limit without uploading it.
    pub fn check_size(image: &TempFile<'_>, config: &Config) -> Result<()> {
        if image.len() > config.max_image_bytes() {
            return Err(Error::Validation(format!(
                "Image size should be at most {} bytes.",
                config.max_image_bytes()
            )));
        }
        Ok(())
    }

    /// Upload an image and return the reference to store.
    pub async fn upload(&self, image: &TempFile<'_>) -> Result<String> {
        match self {
            Self::Offline => {
                let reference = format!("offline://images/{}", Id::new());
                debug!("Image host offline, recording {reference}");
                Ok(reference)
            }
            Self::Remote {
                client,
                upload_url,
                upload_preset,
            } => {
                let mut bytes = Vec::with_capacity(image.len() as usize);
                let reader = image.open().await?;
                rocket::tokio::pin!(reader);
                reader.read_to_end(&mut bytes).await?;

                let file_name = image.name().unwrap_or("image").to_string();
                let form = Form::new()
                    .text("upload_preset", upload_preset.clone())
                    .part("file", Part::bytes(bytes).file_name(file_name));
                let response = client
                    .post(upload_url.as_str())
                    .multipart(form)
                    .send()
                    .await?
                    .error_for_status()?;
                let body: UploadResponse = response.json().await?;
                let url = body.secure_url.ok_or_else(|| {
                    Error::Upstream("Image host did not return an image URL".to_string())
                })?;
                info!("Uploaded image to {url}");
                Ok(url)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, TcpListener};

    use rocket::{
        config::{LogLevel, Shutdown as ShutdownConfig},
        fairing::AdHoc,
        form::Form,
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{serde_json::json, Json, Value},
        tokio::{self, sync::oneshot},
        Shutdown,
    };

    use super::*;
    use crate::error::ErrorMessage;
    use crate::model::store::Db;
    use crate::testing::{
        create_election, form_body, init_logging, login_admin, rocket_for, test_figment,
        SMALL_IMAGE,
    };

    const PRESET: &str = "ballot-box";

    #[derive(FromForm)]
    struct Upload<'r> {
        upload_preset: String,
        file: TempFile<'r>,
    }

    #[post("/upload", data = "<upload>")]
    fn accept(upload: Form<Upload<'_>>) -> std::result::Result<Json<Value>, Status> {
        if upload.upload_preset != PRESET {
            return Err(Status::BadRequest);
        }
        Ok(Json(json!({
            "secure_url": format!("https://images.example.com/{}-bytes.png", upload.file.len())
        })))
    }

    #[post("/forgetful", data = "<_upload>")]
    fn forget(_upload: Form<Upload<'_>>) -> Json<Value> {
        Json(json!({ "public_id": "somewhere" }))
    }

    #[post("/broken", data = "<_upload>")]
    fn fail(_upload: Form<Upload<'_>>) -> Status {
        Status::ServiceUnavailable
    }

    /// Serve a stand-in image host on a free local port, returning its base URL.
    async fn image_host() -> (String, Shutdown) {
        let port = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .and_then(|listener| listener.local_addr())
            .unwrap()
            .port();
        let config = rocket::Config {
            address: Ipv4Addr::LOCALHOST.into(),
            port,
            log_level: LogLevel::Off,
            shutdown: ShutdownConfig {
                ctrlc: false,
                ..Default::default()
            },
            ..rocket::Config::debug_default()
        };
        let (ready, launched) = oneshot::channel();
        let rocket = rocket::custom(config)
            .mount("/", routes![accept, forget, fail])
            .attach(AdHoc::on_liftoff("Ready", |_| {
                Box::pin(async move {
                    let _ = ready.send(());
                })
            }))
            .ignite()
            .await
            .unwrap();
        let shutdown = rocket.shutdown();
        tokio::spawn(rocket.launch());
        launched.await.unwrap();
        (format!("http://127.0.0.1:{port}"), shutdown)
    }

    async fn client_uploading_to(url: String, db: Db) -> Client {
        init_logging();
        let figment = test_figment()
            .merge(("image_upload_url", url))
            .merge(("image_upload_preset", PRESET));
        Client::tracked(rocket_for(figment, db)).await.unwrap()
    }

    #[async_test]
    async fn offline_without_upload_url() {
        let config: Config = crate::testing::test_figment().extract().unwrap();
        let host = ImageHost::from_config(&config).unwrap();
        assert!(matches!(host, ImageHost::Offline));
    }

    #[test]
    fn upload_url_needs_preset() {
        let config: Config = crate::testing::test_figment()
            .merge(("image_upload_url", "https://images.example.com/upload"))
            .extract()
            .unwrap();
        assert!(ImageHost::from_config(&config).is_err());
    }

    #[async_test]
    async fn stores_secure_url() {
        let (host, shutdown) = image_host().await;
        let client = client_uploading_to(format!("{host}/upload"), Db::memory()).await;
        let admin = login_admin(&client).await;

        let election = create_election(&client, &admin, "Club President").await;
        assert_eq!(
            election.image,
            format!("https://images.example.com/{}-bytes.png", SMALL_IMAGE.len())
        );
        shutdown.notify();
    }

    #[async_test]
    async fn host_failures_are_hidden() {
        let (host, shutdown) = image_host().await;
        for path in ["forgetful", "broken"] {
            let db = Db::memory();
            let client = client_uploading_to(format!("{host}/{path}"), db.clone()).await;
            let admin = login_admin(&client).await;

            let response = client
                .post(uri!(crate::api::election::create_election))
                .header(admin.header())
                .header(ContentType::Form)
                .body(form_body(&[
                    ("title", "Club President"),
                    ("description", "Who runs the club"),
                    ("club", SMALL_IMAGE),
                ]))
                .dispatch()
                .await;
            assert_eq!(Status::InternalServerError, response.status(), "{path}");
            assert_eq!(
                response.into_json::<ErrorMessage>().await.unwrap().message,
                "Something went wrong. Please try again later."
            );
            assert!(db.elections().await.unwrap().is_empty());
        }
        shutdown.notify();
    }
}
