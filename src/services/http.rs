//! `reqwest`-backed [`PlatformApi`].
//!
//! Every call builds its headers and signature from the live
//! [`PlatformConstants`], so a constants refresh takes effect on the next
//! request without rebuilding the client.

use super::api::{
    ApiError, ApiReply, AreaEntry, AreaGroup, NavInfo, PlatformApi, QrCode, QrPoll, RoomSnapshot,
    StartLiveReply, TitleReply,
};
use crate::models::{CookieBundle, PlatformConstants, RecentArea};
use crate::sign::{RequestSigner, SignOptions, SignedParams};
use crate::state::Shared;
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Base URLs of the services the client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoints {
    pub passport: String,
    pub api: String,
    pub live: String,
    pub constants_url: String,
    pub release_url: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            passport: "https://passport.bilibili.com".to_string(),
            api: "https://api.bilibili.com".to_string(),
            live: "https://api.live.bilibili.com".to_string(),
            constants_url: "https://gh.vtbs.ai/https://raw.githubusercontent.com/Radekyspec/StartLive/refs/heads/master/resources/version.json".to_string(),
            release_url: "https://gh.vtbs.ai/https://api.github.com/repos/Radekyspec/StartLive/releases/latest".to_string(),
        }
    }
}

impl ApiEndpoints {
    /// Route every service to one base URL (local mock servers).
    pub fn local(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            passport: base.to_string(),
            api: base.to_string(),
            live: base.to_string(),
            constants_url: format!("{base}/resources/version.json"),
            release_url: format!("{base}/releases/latest"),
        }
    }
}

/// `{code, message, data}` wrapper used by every platform endpoint.
///
/// `data` stays untyped because failed calls often send `[]` or `null`.
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default, alias = "msg")]
    message: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl Envelope {
    fn data<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.data.clone()).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Typed payload of a call that must succeed.
    fn into_data<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        if self.code != 0 {
            return Err(ApiError::platform(self.code, self.message));
        }
        self.data()
    }

    fn reply(&self) -> ApiReply {
        ApiReply {
            code: self.code,
            message: self.message.clone(),
        }
    }
}

/// Accepts ids sent either as JSON numbers or as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LenientId {
    Number(u64),
    Text(String),
}

impl Default for LenientId {
    fn default() -> Self {
        Self::Number(0)
    }
}

impl LenientId {
    fn as_u64(&self) -> u64 {
        match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or_default(),
        }
    }

    fn as_u32(&self) -> u32 {
        u32::try_from(self.as_u64()).unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct QrGenerateData {
    qrcode_key: String,
    url: String,
}

#[derive(Deserialize)]
struct QrPollData {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct NavData {
    uname: String,
    mid: LenientId,
}

#[derive(Deserialize)]
struct AreaListData {
    area_v1_info: Vec<AreaInfo>,
}

#[derive(Deserialize)]
struct AreaInfo {
    name: String,
    #[serde(default)]
    list: Vec<SubArea>,
}

#[derive(Deserialize)]
struct SubArea {
    id: LenientId,
    name: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PreLiveData {
    title: String,
}

#[derive(Deserialize)]
struct UcenterLiveInfo {
    room_id: LenientId,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RoomGetInfo {
    live_status: i64,
    parent_name: String,
    area_v2_name: String,
    area_v2_id: LenientId,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AnnounceData {
    announces: HashMap<String, AnnounceItem>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AnnounceItem {
    content: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct StartLiveData {
    rtmp: Option<Rtmp>,
    qr: Option<String>,
}

#[derive(Deserialize)]
struct Rtmp {
    addr: String,
    code: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TitleUpdateData {
    audit_info: Option<AuditInfo>,
}

#[derive(Deserialize)]
struct AuditInfo {
    audit_title: String,
}

#[derive(Deserialize)]
struct ChosenArea {
    #[serde(default)]
    parent_name: String,
    name: String,
}

#[derive(Deserialize)]
struct Release {
    tag_name: String,
}

/// HTTP client for the streaming platform.
pub struct HttpApi {
    client: reqwest::Client,
    endpoints: ApiEndpoints,
    constants: Shared<PlatformConstants>,
}

impl HttpApi {
    pub fn new(constants: Shared<PlatformConstants>) -> Result<Self, ApiError> {
        Self::with_endpoints(constants, ApiEndpoints::default())
    }

    pub fn with_endpoints(
        constants: Shared<PlatformConstants>,
        endpoints: ApiEndpoints,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoints,
            constants,
        })
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    fn signer(&self) -> RequestSigner {
        self.constants.read(RequestSigner::from_constants)
    }

    fn sign<'a>(
        &self,
        payload: impl IntoIterator<Item = (&'a str, String)>,
        options: SignOptions,
    ) -> SignedParams {
        self.signer().sign_now(payload, options)
    }

    fn with_session(request: RequestBuilder, session: Option<&CookieBundle>) -> RequestBuilder {
        match session {
            Some(cookies) if !cookies.is_empty() => request.header(COOKIE, cookies.header_value()),
            _ => request,
        }
    }

    fn get(&self, url: String, session: Option<&CookieBundle>) -> RequestBuilder {
        let headers = self.constants.read(|c| header_map(&c.headers_web));
        Self::with_session(self.client.get(url).headers(headers), session)
    }

    fn post(&self, url: String, session: Option<&CookieBundle>) -> RequestBuilder {
        let headers = self.constants.read(|c| header_map(&c.headers_web));
        Self::with_session(self.client.post(url).headers(headers), session)
    }

    async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn envelope(request: RequestBuilder) -> Result<Envelope, ApiError> {
        Self::decode(Self::send(request).await?).await
    }

    /// Signed params of a mutating call, with the csrf pair when required.
    fn mutating(
        &self,
        payload: Vec<(&str, String)>,
        session: &CookieBundle,
        csrf_required: bool,
    ) -> SignedParams {
        let signed = self.sign(payload, SignOptions::default());
        match session.csrf() {
            Some(csrf) if csrf_required => signed.with_csrf(csrf),
            _ => signed,
        }
    }

    /// Form fields sent next to an unsigned-body call: the csrf pair first,
    /// then `fields`, sorted by key.
    fn csrf_form(session: &CookieBundle, fields: Vec<(&str, String)>) -> Vec<(String, String)> {
        let csrf = session.csrf().unwrap_or_default().to_string();
        let mut form: Vec<(String, String)> = vec![
            ("csrf".to_string(), csrf.clone()),
            ("csrf_token".to_string(), csrf),
        ];
        form.extend(fields.into_iter().map(|(k, v)| (k.to_string(), v)));
        form.sort();
        form
    }
}

fn header_map(headers: &IndexMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!("Skipping invalid header {:?}", name),
        }
    }
    map
}

#[async_trait]
impl PlatformApi for HttpApi {
    async fn generate_qr(&self) -> Result<QrCode, ApiError> {
        let url = format!(
            "{}/x/passport-login/web/qrcode/generate",
            self.endpoints.passport
        );
        let now = chrono::Utc::now();
        let go_url = format!(
            "https://live.bilibili.com/p/html/live-pc-blink/mini-login-v2/?livehime_create_ts={}&livehime_ts={}",
            now.timestamp_millis(),
            now.timestamp()
        );
        tracing::info!("QR generate request");
        let request = self.get(url, None).query(&[
            ("source", "live_pc"),
            ("go_url", go_url.as_str()),
            ("web_location", "0.0"),
        ]);
        let data: QrGenerateData = Self::envelope(request).await?.into_data()?;
        Ok(QrCode {
            key: data.qrcode_key,
            url: data.url,
        })
    }

    async fn poll_qr(&self, qr_key: &str) -> Result<QrPoll, ApiError> {
        let url = format!("{}/x/passport-login/web/qrcode/poll", self.endpoints.passport);
        let request = self.get(url, None).query(&[
            ("qrcode_key", qr_key),
            ("source", "live_pc"),
            ("web_location", "0.0"),
        ]);
        let response = Self::send(request).await?;
        let cookies = CookieBundle::from_set_cookie(
            response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        );
        let data: QrPollData = Self::decode::<Envelope>(response).await?.into_data()?;
        tracing::debug!("QR poll code {}", data.code);
        Ok(QrPoll {
            code: data.code,
            message: data.message,
            cookies: if data.code == 0 {
                cookies
            } else {
                CookieBundle::new()
            },
        })
    }

    async fn nav(&self, session: &CookieBundle) -> Result<NavInfo, ApiError> {
        let url = format!("{}/x/web-interface/nav", self.endpoints.api);
        let params = self.sign(Vec::new(), SignOptions::web());
        let envelope = Self::envelope(self.get(url, Some(session)).query(&params.to_pairs())).await?;
        let data: NavData = if envelope.code == 0 {
            envelope.data()?
        } else {
            NavData::default()
        };
        Ok(NavInfo {
            code: envelope.code,
            message: envelope.message,
            uname: data.uname,
            mid: data.mid.as_u64(),
        })
    }

    async fn area_list(&self, session: &CookieBundle) -> Result<Vec<AreaGroup>, ApiError> {
        let url = format!(
            "{}/xlive/app-blink/v1/preLive/GetAreaListForLive",
            self.endpoints.live
        );
        let params = self.sign(Vec::new(), SignOptions::default());
        let data: AreaListData = Self::envelope(self.get(url, Some(session)).query(&params.to_pairs()))
            .await?
            .into_data()?;
        Ok(data
            .area_v1_info
            .into_iter()
            .map(|group| AreaGroup {
                name: group.name,
                children: group
                    .list
                    .into_iter()
                    .map(|sub| AreaEntry {
                        id: sub.id.as_u32(),
                        name: sub.name,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn pre_live(&self, session: &CookieBundle) -> Result<String, ApiError> {
        let url = format!("{}/xlive/app-blink/v1/preLive/PreLive", self.endpoints.live);
        let payload = vec![
            ("area", "True".to_string()),
            ("cover", "True".to_string()),
            ("coverVertical", "True".to_string()),
            ("liveDirectionType", "0".to_string()),
            ("mobi_app", "pc_link".to_string()),
            ("schedule", "True".to_string()),
            ("title", "True".to_string()),
        ];
        let params = self.sign(payload, SignOptions::default());
        let data: PreLiveData = Self::envelope(self.get(url, Some(session)).query(&params.to_pairs()))
            .await?
            .into_data()?;
        Ok(data.title)
    }

    async fn room_info(&self, session: &CookieBundle) -> Result<RoomSnapshot, ApiError> {
        let uid = session
            .uid()
            .ok_or_else(|| ApiError::Decode("session has no account id".to_string()))?
            .to_string();

        let url = format!("{}/xlive/web-ucenter/user/live_info", self.endpoints.live);
        let ucenter: UcenterLiveInfo = Self::envelope(self.get(url, Some(session)))
            .await?
            .into_data()?;

        let url = format!("{}/xlive/app-blink/v1/room/GetInfo", self.endpoints.live);
        let params = self.sign(vec![("uId", uid)], SignOptions::default());
        let info: RoomGetInfo = Self::envelope(self.get(url, Some(session)).query(&params.to_pairs()))
            .await?
            .into_data()?;

        Ok(RoomSnapshot {
            room_id: ucenter.room_id.as_u64().to_string(),
            live: info.live_status == 1,
            parent_area: info.parent_name,
            area: info.area_v2_name,
            area_code: info.area_v2_id.as_u32(),
        })
    }

    async fn announce(&self, session: &CookieBundle) -> Result<String, ApiError> {
        let url = format!("{}/xlive/app-blink/v1/room/AnnounceInfo", self.endpoints.live);
        let params = self.sign(Vec::new(), SignOptions::default());
        let mut data: AnnounceData =
            Self::envelope(self.get(url, Some(session)).query(&params.to_pairs()))
                .await?
                .into_data()?;
        Ok(data
            .announces
            .remove("1")
            .map(|item| item.content)
            .unwrap_or_default())
    }

    async fn room_pre_live_status(&self, session: &CookieBundle) -> Result<ApiReply, ApiError> {
        let url = format!(
            "{}/xlive/app-blink/v1/index/GetRoomPreLiveStatus",
            self.endpoints.live
        );
        let params = self.sign(Vec::new(), SignOptions::default().without_access_key());
        let envelope = Self::envelope(self.get(url, Some(session)).query(&params.to_pairs())).await?;
        Ok(envelope.reply())
    }

    async fn start_live(
        &self,
        session: &CookieBundle,
        room_id: &str,
        area_code: u32,
    ) -> Result<StartLiveReply, ApiError> {
        let url = format!("{}/room/v1/Room/startLive", self.endpoints.live);
        let csrf_required = self.constants.read(|c| c.start_live_csrf);
        let params = self.mutating(
            vec![
                ("room_id", room_id.to_string()),
                ("area_v2", area_code.to_string()),
                ("type", "2".to_string()),
            ],
            session,
            csrf_required,
        );
        let envelope = Self::envelope(self.post(url, Some(session)).form(&params.to_pairs())).await?;
        let data: StartLiveData = envelope.data().unwrap_or_default();
        let (addr, key) = match data.rtmp {
            Some(rtmp) => (Some(rtmp.addr), Some(rtmp.code)),
            None => (None, None),
        };
        Ok(StartLiveReply {
            code: envelope.code,
            message: envelope.message,
            addr,
            key,
            face_url: data.qr,
        })
    }

    async fn stop_live(&self, session: &CookieBundle, room_id: &str) -> Result<ApiReply, ApiError> {
        let url = format!("{}/room/v1/Room/stopLive", self.endpoints.live);
        let csrf_required = self.constants.read(|c| c.stop_live_csrf);
        let params = self.mutating(vec![("room_id", room_id.to_string())], session, csrf_required);
        let envelope = Self::envelope(self.post(url, Some(session)).form(&params.to_pairs())).await?;
        Ok(envelope.reply())
    }

    async fn update_title(
        &self,
        session: &CookieBundle,
        room_id: &str,
        title: &str,
    ) -> Result<TitleReply, ApiError> {
        let url = format!(
            "{}/xlive/app-blink/v1/preLive/UpdatePreLiveInfo",
            self.endpoints.live
        );
        let params = self.sign(Vec::new(), SignOptions::default());
        let form = Self::csrf_form(
            session,
            vec![
                ("mobi_app", "pc_link".to_string()),
                ("room_id", room_id.to_string()),
                ("title", title.to_string()),
            ],
        );
        tracing::info!("Title update request");
        let request = self
            .post(url, Some(session))
            .query(&params.to_pairs())
            .form(&form);
        let envelope = Self::envelope(request).await?;
        let data: TitleUpdateData = if envelope.code == 0 {
            envelope.data()?
        } else {
            TitleUpdateData::default()
        };
        Ok(TitleReply {
            code: envelope.code,
            message: envelope.message,
            audit_title: data.audit_info.map(|info| info.audit_title),
        })
    }

    async fn update_announce(
        &self,
        session: &CookieBundle,
        content: &str,
    ) -> Result<ApiReply, ApiError> {
        let url = format!("{}/xlive/app-blink/v1/room/AnnounceCommit", self.endpoints.live);
        let mut form = self.sign(Vec::new(), SignOptions::default()).to_pairs();
        form.extend(Self::csrf_form(
            session,
            vec![("content", content.to_string()), ("type", "1".to_string())],
        ));
        form.sort();
        tracing::info!("Announcement update request");
        let envelope = Self::envelope(self.post(url, Some(session)).form(&form)).await?;
        Ok(envelope.reply())
    }

    async fn change_area(
        &self,
        session: &CookieBundle,
        room_id: &str,
        area_code: u32,
    ) -> Result<ApiReply, ApiError> {
        let url = format!(
            "{}/xlive/app-blink/v2/room/AnchorChangeRoomArea",
            self.endpoints.live
        );
        let params = self.sign(Vec::new(), SignOptions::default());
        let build = self.constants.read(|c| c.build.clone());
        let form = Self::csrf_form(
            session,
            vec![
                ("area_id", area_code.to_string()),
                ("build", build),
                ("platform", "pc_link".to_string()),
                ("room_id", room_id.to_string()),
            ],
        );
        tracing::info!("Area change request");
        let request = self
            .post(url, Some(session))
            .query(&params.to_pairs())
            .form(&form);
        Ok(Self::envelope(request).await?.reply())
    }

    async fn recent_areas(
        &self,
        session: &CookieBundle,
        room_id: &str,
    ) -> Result<Vec<RecentArea>, ApiError> {
        let url = format!("{}/room/v1/Area/getMyChooseArea", self.endpoints.live);
        let params = self.sign(vec![("roomid", room_id.to_string())], SignOptions::default());
        let areas: Vec<ChosenArea> =
            Self::envelope(self.get(url, Some(session)).query(&params.to_pairs()))
                .await?
                .into_data()?;
        Ok(areas
            .into_iter()
            .map(|area| RecentArea {
                parent: area.parent_name,
                name: area.name,
            })
            .collect())
    }

    async fn remote_constants(&self) -> Result<serde_json::Value, ApiError> {
        tracing::info!("version.json request");
        let response = Self::send(self.client.get(&self.endpoints.constants_url)).await?;
        Self::decode(response).await
    }

    async fn latest_release(&self) -> Result<String, ApiError> {
        let request = self
            .client
            .get(&self.endpoints.release_url)
            .header(reqwest::header::USER_AGENT, "StartLive");
        let release: Release = Self::decode(Self::send(request).await?).await?;
        Ok(release.tag_name)
    }
}
