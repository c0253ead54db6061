use figment::Figment;
use rocket::data::{ByteUnit, Data, ToByteUnit};
use rocket::http::{self, Status};
use rocket::outcome::Outcome;
use rocket::request::{self, FromRequest};
use rocket::response::Redirect;
use rocket::serde::{json::Json, Serialize};
use rocket::tokio::fs;
use rocket::{Either, State};
use tokio_util::codec;

use crate::access::Authorized;
use crate::errors::{self, PimbinError};
use crate::service::Pimbin;
use crate::sniff;

#[derive(Debug)]
struct MultipartBoundary<'r>(&'r str);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for MultipartBoundary<'r> {
    type Error = PimbinError;

    async fn from_request(request: &'r rocket::Request<'_>) -> request::Outcome<Self, Self::Error> {
        let boundary = request
            .content_type()
            .filter(|ct| ct.is_form_data())
            .and_then(|ct| ct.media_type().param("boundary"));
        match boundary {
            Some(boundary) => Outcome::Success(MultipartBoundary(boundary)),
            None => {
                let err = PimbinError::Validation(
                    "expected a multipart/form-data body with a boundary".to_string(),
                );
                Outcome::Error((err.status(), err))
            }
        }
    }
}

/// `Authorization: Bearer <token>`; the bare token is accepted too.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for Authorized {
    type Error = PimbinError;

    async fn from_request(request: &'r rocket::Request<'_>) -> request::Outcome<Self, Self::Error> {
        let pimbin = match request.rocket().state::<Pimbin>() {
            Some(pimbin) => pimbin,
            None => {
                let err = PimbinError::Other(anyhow!("pimbin state is not managed"));
                return Outcome::Error((err.status(), err));
            }
        };

        let token = request
            .headers()
            .get_one("Authorization")
            .map(|h| h.strip_prefix("Bearer ").unwrap_or(h).trim())
            .filter(|t| !t.is_empty());

        match pimbin.access().authorize(token) {
            Ok(who) => {
                log::debug!("request authorized as {}", who.username());
                Outcome::Success(who)
            }
            Err(err) => {
                let err = PimbinError::from(err);
                Outcome::Error((err.status(), err))
            }
        }
    }
}

#[rocket::post("/", data = "<data>")]
async fn upload(
    who: Result<Authorized, PimbinError>,
    boundary: Result<MultipartBoundary<'_>, PimbinError>,
    data: Data<'_>,
    pimbin: &State<Pimbin>,
) -> errors::Result<String> {
    let who = who?;
    let boundary = boundary?;

    // the multipart parser enforces the real limit, leave room for the
    // boundaries so it is the one reporting the error
    let limit = pimbin.max_body_size().bytes() + ByteUnit::Kibibyte(10);
    let stream = codec::FramedRead::new(data.open(limit), codec::BytesCodec::new());

    let paste = pimbin.upload(&who, stream, boundary.0).await?;
    Ok(format!("{}\n", pimbin.paste_url(&paste.id)))
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct FileView {
    name: String,
    hash: String,
    url: String,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct PasteView {
    id: String,
    owner: String,
    files: Vec<FileView>,
}

#[rocket::get("/<id>")]
async fn get_paste(
    id: &str,
    pimbin: &State<Pimbin>,
) -> errors::Result<Either<Redirect, Json<PasteView>>> {
    let paste = pimbin.get_paste(id).await?;
    if let Some(url) = pimbin.direct_url(&paste).await? {
        return Ok(Either::Left(Redirect::moved(url)));
    }

    let files = paste
        .files
        .into_iter()
        .map(|f| FileView {
            url: pimbin.blob_url(&f.hash, &f.name),
            name: f.name,
            hash: f.hash,
        })
        .collect();
    Ok(Either::Right(Json(PasteView {
        id: paste.id,
        owner: paste.owner,
        files,
    })))
}

#[rocket::get("/blob/<hash>")]
async fn get_blob(hash: &str, pimbin: &State<Pimbin>) -> errors::Result<(http::ContentType, fs::File)> {
    send_blob(pimbin, hash, "").await
}

#[rocket::get("/blob/<hash>/<name>")]
async fn get_named_blob(
    hash: &str,
    name: &str,
    pimbin: &State<Pimbin>,
) -> errors::Result<(http::ContentType, fs::File)> {
    send_blob(pimbin, hash, name).await
}

async fn send_blob(
    pimbin: &Pimbin,
    hash: &str,
    name: &str,
) -> errors::Result<(http::ContentType, fs::File)> {
    let (fd, mime) = pimbin.read_blob(hash, name).await?;
    let content_type = if mime == sniff::TEXT_PLAIN {
        http::ContentType::Plain
    } else {
        http::ContentType::parse_flexible(&mime).unwrap_or(http::ContentType::Binary)
    };
    Ok((content_type, fd))
}

#[rocket::delete("/<id>")]
async fn delete_paste(
    id: &str,
    who: Result<Authorized, PimbinError>,
    pimbin: &State<Pimbin>,
) -> errors::Result<Status> {
    let who = who?;
    pimbin.delete_paste(&who, id).await?;
    Ok(Status::NoContent)
}

pub fn build(pimbin: Pimbin, figment: Figment) -> rocket::Rocket<rocket::Build> {
    rocket::custom(figment)
        .mount(
            "/",
            rocket::routes![
                upload,
                get_paste,
                get_blob,
                get_named_blob,
                delete_paste
            ],
        )
        .manage(pimbin)
}
