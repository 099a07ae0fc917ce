use std::sync::Arc;

use async_stream::try_stream;
use dmirror::path::FsPath;
use futures::{Stream, StreamExt, TryStreamExt};

use super::{id::Id, query::Query, DeleteOutcome, RemoteObject};
use crate::{oauth2::GetToken, PersistCache};

pub const DRIVE_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";

const DEFAULT_PAGE_SIZE: u32 = 100;

/// Google Drive (v3 REST API) implementation of [`super::RemoteStore`]
#[derive(Clone)]
pub struct GoogleDrive<A> {
    client: reqwest::Client,
    auth: Arc<A>,
    base_url: String,
    upload_base_url: String,
    user_agent: String,
    page_size: u32,
}

impl<A> GoogleDrive<A>
where
    A: GetToken,
{
    pub async fn new(auth: A, client: reqwest::Client) -> dmirror::Result<Self> {
        Self::with_base_urls(auth, client, DRIVE_URL, DRIVE_UPLOAD_URL).await
    }

    /// Builds the store against other endpoints than Google's.
    /// The account is queried once, so that bad credentials fail here
    /// rather than in the middle of a sync.
    pub async fn with_base_urls(
        auth: A,
        client: reqwest::Client,
        base_url: impl Into<String>,
        upload_base_url: impl Into<String>,
    ) -> dmirror::Result<Self> {
        let user_agent = format!("dmirror/{}", env!("CARGO_PKG_VERSION"));
        let drive = Self {
            auth: Arc::new(auth),
            client,
            base_url: base_url.into(),
            upload_base_url: upload_base_url.into(),
            user_agent,
            page_size: DEFAULT_PAGE_SIZE,
        };

        let about = drive.about_get().await?;
        log::info!(
            "Access granted to Drive of {}{}",
            about.user.display_name,
            about
                .user
                .email_address
                .as_ref()
                .map(|em| format!(" <{em}>"))
                .unwrap_or_default(),
        );
        let quota = &about.storage_quota;
        if let (Some(usage), Some(limit)) = (quota.usage, quota.limit) {
            use byte_unit::{Byte, UnitType};
            if let (Some(usage), Some(limit)) = (Byte::from_i64(usage), Byte::from_i64(limit)) {
                let usage = usage.get_appropriate_unit(UnitType::Binary);
                let limit = limit.get_appropriate_unit(UnitType::Binary);
                log::info!("Usage {usage:#.2} / {limit:#.3}");
            }
        }

        Ok(drive)
    }

    /// Number of objects requested per page of listing
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Streams every file matching `q`, across all pages.
    fn files_stream(
        &self,
        q: Query,
        page_size: u32,
    ) -> impl Stream<Item = dmirror::Result<api::File>> + Send + '_ {
        let q = q.to_string();
        log::trace!("files.list q=\"{q}\"");
        let mut next_page_token = None;

        try_stream! {
            loop {
                let file_list = self.files_list(&q, page_size, next_page_token.take()).await?;
                if let Some(files) = file_list.files {
                    for f in files {
                        yield f;
                    }
                }
                next_page_token = file_list.next_page_token;
                if next_page_token.is_none() {
                    break;
                }
            }
        }
    }

    async fn first_match(&self, q: Query) -> dmirror::Result<Option<RemoteObject>> {
        let files = self.files_stream(q, 1);
        futures::pin_mut!(files);
        files.try_next().await?.map(map_file).transpose()
    }
}

impl<A> super::FindByName for GoogleDrive<A>
where
    A: GetToken,
{
    async fn find_by_name(
        &self,
        name: &str,
        parent_id: Option<&Id>,
    ) -> dmirror::Result<Option<RemoteObject>> {
        let q = Query::name_under(name, parent_id);
        let live = q.clone().and(Query::field_eq("trashed", false));
        if let Some(obj) = self.first_match(live).await? {
            return Ok(Some(obj));
        }
        self.first_match(q).await
    }
}

impl<A> super::FindById for GoogleDrive<A>
where
    A: GetToken,
{
    async fn find_by_id(&self, id: &Id) -> dmirror::Result<Option<String>> {
        let file = self.files_get(id, "name").await?;
        Ok(file.and_then(|f| f.name))
    }
}

impl<A> super::IsTrashed for GoogleDrive<A>
where
    A: GetToken,
{
    async fn is_trashed(&self, id: &Id) -> dmirror::Result<bool> {
        let file = self
            .files_get(id, "trashed")
            .await?
            .ok_or_else(|| dmirror::api_error!("No such object: {id}"))?;
        Ok(file.trashed.unwrap_or(false))
    }
}

impl<A> super::ListChildren for GoogleDrive<A>
where
    A: GetToken,
{
    fn list_children(
        &self,
        parent_id: &Id,
    ) -> impl Stream<Item = dmirror::Result<RemoteObject>> + Send {
        self.files_stream(Query::in_parents(parent_id), self.page_size)
            .map(|f| f.and_then(map_file))
    }
}

impl<A> super::CreateFolder for GoogleDrive<A>
where
    A: GetToken,
{
    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&Id>,
    ) -> dmirror::Result<RemoteObject> {
        match parent_id {
            Some(parent_id) => log::info!("creating folder {name} in folder {parent_id}"),
            None => log::info!("creating folder {name} in root folder"),
        }
        let f = api::File {
            name: Some(name.to_string()),
            mime_type: Some(FOLDER_MIMETYPE.to_string()),
            parents: parent_id.map(|id| vec![id.to_id_buf()]),
            ..Default::default()
        };
        let res = self.files_create(&f).await?;
        let folder = map_file(res)?;
        log::info!("created folder {name} with id {}", folder.id);
        Ok(folder)
    }
}

impl<A> super::UploadFile for GoogleDrive<A>
where
    A: GetToken,
{
    async fn upload_file(
        &self,
        local_path: &FsPath,
        name: &str,
        parent_id: Option<&Id>,
    ) -> dmirror::Result<RemoteObject> {
        let data = tokio::fs::File::open(local_path).await?;
        let size = data.metadata().await?.len();
        log::info!("uploading {local_path} as {name} ({size} bytes)");
        let f = api::File {
            name: Some(name.to_string()),
            parents: parent_id.map(|id| vec![id.to_id_buf()]),
            ..Default::default()
        };
        let res = self.files_create_upload(&f, size, data).await?;
        map_file(res)
    }
}

impl<A> super::Delete for GoogleDrive<A>
where
    A: GetToken,
{
    async fn delete(&self, id: &Id) -> DeleteOutcome {
        match self.files_delete(id).await {
            Ok(true) => DeleteOutcome::Deleted,
            Ok(false) => DeleteOutcome::NotFound,
            Err(err) => DeleteOutcome::Failed(err),
        }
    }
}

impl<A> PersistCache for GoogleDrive<A>
where
    A: PersistCache + Send + Sync,
{
    async fn persist_cache(&self) -> anyhow::Result<()> {
        self.auth.persist_cache().await
    }
}

impl<A: GetToken> super::RemoteStore for GoogleDrive<A> {}

const FOLDER_MIMETYPE: &str = "application/vnd.google-apps.folder";

fn map_file(f: api::File) -> dmirror::Result<RemoteObject> {
    let id = f
        .id
        .ok_or_else(|| dmirror::api_error!("Expected to receive id from Google"))?;
    let name = f
        .name
        .ok_or_else(|| dmirror::api_error!("Expected to receive name from Google for {id}"))?;
    Ok(RemoteObject {
        id,
        name,
        parent_id: f.parents.and_then(|p| p.into_iter().next()),
        trashed: f.trashed.unwrap_or(false),
    })
}

mod api {
    use http::StatusCode;
    use serde::{Deserialize, Serialize};
    use tokio::io;

    use super::utils::{check_response, num_from_str};
    use crate::{
        oauth2::GetToken,
        storage::id::{Id, IdBuf},
    };

    #[derive(Default, Clone, Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct User {
        pub display_name: String,
        pub email_address: Option<String>,
    }

    #[derive(Default, Clone, Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Quota {
        #[serde(default, deserialize_with = "num_from_str")]
        pub limit: Option<i64>,
        #[serde(default, deserialize_with = "num_from_str")]
        pub usage: Option<i64>,
    }

    const ABOUT_FIELDS: &str = "kind,storageQuota,user";

    #[derive(Default, Clone, Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct About {
        kind: String,
        #[serde(default)]
        pub storage_quota: Quota,
        pub user: User,
    }

    const FILE_FIELDS: &str = "id,name,parents,trashed,mimeType";

    #[derive(Default, Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct File {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub id: Option<IdBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub parents: Option<Vec<IdBuf>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub trashed: Option<bool>,
    }

    #[derive(Default, Clone, Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FileList {
        pub files: Option<Vec<File>>,
        pub next_page_token: Option<String>,
    }

    pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

    #[derive(Debug, Copy, Clone)]
    pub enum UploadType {
        Resumable,
    }

    impl UploadType {
        pub fn as_str(&self) -> &str {
            match self {
                UploadType::Resumable => "resumable",
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct UploadParams<'a> {
        pub typ: UploadType,
        pub size: Option<u64>,
        pub mime_type: Option<&'a str>,
        pub fields: &'a str,
    }

    impl<'a> UploadParams<'a> {
        pub fn query_params(&'a self) -> Vec<(&'static str, &'a str)> {
            vec![("uploadType", self.typ.as_str()), ("fields", self.fields)]
        }
    }

    /// Google requires chunks to be multiples of 256 KiB
    const UPLOAD_CHUNK_SZ: u64 = 2 * 256 * 1024;

    impl<A> super::GoogleDrive<A>
    where
        A: GetToken,
    {
        pub async fn about_get(&self) -> dmirror::Result<About> {
            let path = "/about";
            let query_params = vec![("fields", ABOUT_FIELDS)];

            let res = self.get_query(path, query_params).await?;
            let res = check_response("GET", path, res).await?;
            let about: About = res.json().await?;
            if about.kind != "drive#about" {
                dmirror::api_bail!("/about returned wrong kind: {}", about.kind);
            }
            Ok(about)
        }

        pub async fn files_list(
            &self,
            q: &str,
            page_size: u32,
            page_token: Option<String>,
        ) -> dmirror::Result<FileList> {
            let path = "/files";

            let mut query_params = vec![
                ("q", q.to_string()),
                ("fields", format!("nextPageToken,files({FILE_FIELDS})")),
                ("pageSize", page_size.to_string()),
            ];
            if let Some(page_token) = page_token {
                query_params.push(("pageToken", page_token));
            }

            let res = self.get_query(path, query_params).await?;
            let res = check_response("GET", path, res).await?;

            let file_list: FileList = res.json().await?;
            Ok(file_list)
        }

        /// Gets the requested fields of `file_id`, or `None` if it doesn't exist.
        pub async fn files_get(&self, file_id: &Id, fields: &str) -> dmirror::Result<Option<File>> {
            let path = format!("/files/{file_id}");
            let query_params = &[("fields", fields)];

            let res = self.get_query(&path, query_params).await?;
            if res.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let res = check_response("GET", &path, res).await?;
            Ok(Some(res.json().await?))
        }

        pub async fn files_create(&self, file: &File) -> dmirror::Result<File> {
            let path = "/files";
            let query_params = &[("fields", FILE_FIELDS)];
            let res = self.post_json_query(path, query_params, file).await?;
            let res = check_response("POST", path, res).await?;

            let file: File = res.json().await?;
            Ok(file)
        }

        pub async fn files_create_upload<D>(
            &self,
            file: &File,
            data_len: u64,
            data: D,
        ) -> dmirror::Result<File>
        where
            D: io::AsyncRead + Send,
        {
            use io::AsyncReadExt;

            let upload_params = UploadParams {
                typ: UploadType::Resumable,
                size: Some(data_len),
                mime_type: file.mime_type.as_deref(),
                fields: FILE_FIELDS,
            };
            let upload_url = self
                .post_upload_request("/files", &upload_params, Some(file))
                .await?;

            tokio::pin!(data);

            let mut sent = 0u64;
            let file: File = loop {
                let mut buf: Vec<u8> = Vec::with_capacity(UPLOAD_CHUNK_SZ as _);
                let sz = data
                    .as_mut()
                    .take(UPLOAD_CHUNK_SZ.min(data_len - sent))
                    .read_to_end(&mut buf)
                    .await?;
                if sz == 0 && sent < data_len {
                    dmirror::io_bail!("file shrank during upload ({sent} of {data_len} bytes)");
                }
                log::trace!("uploading {sz} bytes at offset {sent}");
                let res = self
                    .put_upload_range(upload_url.clone(), buf, sent, data_len)
                    .await?;
                sent += sz as u64;
                let status = res.status();
                if status.is_success() && sent >= data_len {
                    break res.json().await?;
                } else if status.is_server_error() {
                    dmirror::api_bail!("Upload failed ({status}). No support yet to resume upload");
                } else if status.is_client_error() {
                    dmirror::api_bail!(
                        "bad request ({status}): {}",
                        res.text().await.unwrap_or_default()
                    );
                }
            };
            Ok(file)
        }

        /// Returns `Ok(false)` if the file didn't exist.
        pub async fn files_delete(&self, file_id: &Id) -> dmirror::Result<bool> {
            let path = format!("/files/{file_id}");
            let res = self.delete_query(&path).await?;
            if res.status() == StatusCode::NOT_FOUND {
                return Ok(false);
            }
            check_response("DELETE", &path, res).await?;
            Ok(true)
        }
    }
}

mod utils {
    use std::borrow::Borrow;

    use oauth2::{AccessToken, Scope};
    use reqwest::{header, Response, StatusCode, Url};
    use serde::{Deserialize, Deserializer, Serialize};

    use super::api;
    use crate::oauth2::GetToken;

    /// Google sends 64-bit integers as strings
    pub fn num_from_str<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use std::str::FromStr;

        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| i64::from_str(&s).map_err(serde::de::Error::custom))
            .transpose()
    }

    pub async fn check_response(
        method: &str,
        path: &str,
        res: Response,
    ) -> dmirror::Result<Response> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            dmirror::auth_bail!("{method} {path} returned {status}\n{body}");
        }
        dmirror::api_bail!("{method} {path} returned {status}\n{body}");
    }

    impl<A> super::GoogleDrive<A>
    where
        A: GetToken,
    {
        pub async fn fetch_token(&self) -> dmirror::Result<AccessToken> {
            let scopes = vec![Scope::new(api::DRIVE_SCOPE.to_string())];
            self.auth
                .get_token(scopes)
                .await
                .map_err(|err| dmirror::auth_error!("{err:#}"))
        }

        pub async fn get_query<Q, K, V>(
            &self,
            path: &str,
            query_params: Q,
        ) -> dmirror::Result<Response>
        where
            Q: IntoIterator,
            Q::Item: Borrow<(K, V)>,
            K: AsRef<str>,
            V: AsRef<str>,
        {
            let token = self.fetch_token().await?;
            let url = url_with_query(&self.base_url, path, query_params)?;

            let res = self
                .client
                .get(url)
                .header(header::USER_AGENT, &self.user_agent)
                .bearer_auth(token.secret())
                .send()
                .await?;

            Ok(res)
        }

        pub async fn delete_query(&self, path: &str) -> dmirror::Result<Response> {
            let token = self.fetch_token().await?;
            let url = format!("{}{path}", self.base_url);
            let url = Url::parse(&url)
                .map_err(|err| dmirror::other_error!("Invalid URL {url}: {err}"))?;

            let res = self
                .client
                .delete(url)
                .header(header::USER_AGENT, &self.user_agent)
                .bearer_auth(token.secret())
                .send()
                .await?;

            Ok(res)
        }

        pub async fn post_json_query<T, Q, K, V>(
            &self,
            path: &str,
            query_params: Q,
            body: &T,
        ) -> dmirror::Result<Response>
        where
            T: Serialize,
            Q: IntoIterator,
            Q::Item: Borrow<(K, V)>,
            K: AsRef<str>,
            V: AsRef<str>,
        {
            let token = self.fetch_token().await?;
            let url = url_with_query(&self.base_url, path, query_params)?;
            let res = self
                .client
                .post(url)
                .bearer_auth(token.secret())
                .header(header::USER_AGENT, &self.user_agent)
                .json(body)
                .send()
                .await?;
            Ok(res)
        }

        /// Starts a resumable upload session and returns the session URL.
        pub async fn post_upload_request<B>(
            &self,
            path: &str,
            params: &api::UploadParams<'_>,
            body: Option<&B>,
        ) -> dmirror::Result<Url>
        where
            B: Serialize,
        {
            let token = self.fetch_token().await?;

            let url = url_with_query(&self.upload_base_url, path, params.query_params())?;
            let mut req = self
                .client
                .post(url)
                .bearer_auth(token.secret())
                .header(header::USER_AGENT, &self.user_agent);
            if let Some(mt) = params.mime_type {
                req = req.header("X-Upload-Content-Type", mt);
            }
            if let Some(sz) = params.size {
                req = req.header("X-Upload-Content-Length", sz);
            }
            if let Some(body) = body {
                req = req.json(body);
            }
            let res = req.send().await?;
            let res = check_response("POST", path, res).await?;

            let location = res
                .headers()
                .get(header::LOCATION)
                .ok_or_else(|| {
                    dmirror::api_error!("No upload location returned by POST {path}")
                })?;
            let location = location
                .to_str()
                .map_err(|err| dmirror::api_error!("Invalid upload location: {err}"))?;
            Url::parse(location)
                .map_err(|err| dmirror::api_error!("Invalid upload location: {err}"))
        }

        pub async fn put_upload_range(
            &self,
            url: Url,
            data: Vec<u8>,
            range_start: u64,
            range_len: u64,
        ) -> dmirror::Result<Response> {
            let token = self.fetch_token().await?;

            let data_len = data.len() as u64;
            debug_assert!(range_len >= range_start + data_len);

            let mut req = self
                .client
                .put(url)
                .bearer_auth(token.secret())
                .header(header::USER_AGENT, &self.user_agent)
                .header(header::CONTENT_LENGTH, data_len);
            if data_len > 0 && (range_start > 0 || data_len < range_len) {
                req = req.header(
                    header::CONTENT_RANGE,
                    format!(
                        "bytes {range_start}-{}/{range_len}",
                        range_start + data_len - 1
                    ),
                );
            }
            Ok(req.body(data).send().await?)
        }
    }

    pub fn url_with_query<B, P, Q, K, V>(
        base_url: B,
        path: P,
        query_params: Q,
    ) -> dmirror::Result<Url>
    where
        B: AsRef<str>,
        P: AsRef<str>,
        Q: IntoIterator,
        Q::Item: Borrow<(K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let base = format!("{}{}", base_url.as_ref(), path.as_ref());
        Url::parse_with_params(&base, query_params)
            .map_err(|err| dmirror::other_error!("Invalid URL {base}: {err}"))
    }

    #[test]
    fn test_url_with_query() {
        let url = url_with_query(
            "https://www.googleapis.com/drive/v3",
            "/files",
            &[("q", "name = 'O\\'Brien'"), ("pageSize", "1")],
        )
        .unwrap();
        assert_eq!(url.path(), "/drive/v3/files");
        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs[0].1, "name = 'O\\'Brien'");
        assert_eq!(pairs[1].1, "1");
    }
}
