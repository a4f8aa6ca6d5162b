//! vCenter / CNS implementation of [`StorageClient`].
//!
//! Inventory lookups and task polling go to the vim25 endpoint (`/sdk`);
//! CNS volume operations go to the vSAN health endpoint (`/vsanHealth`). Both
//! share the `vmware_soap_session` cookie obtained at login.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::bootstrap::{Credentials, SessionSettings};
use crate::config::MigrateConfig;
use crate::soap::{self, escape, Element};
use crate::storage::{
    BackendRef, Fault, FaultCategory, QueryCursor, Result, StorageClient, StorageError,
    TaskHandle, TaskResult, VolumeOperationResult, VolumePage, VolumeQuery,
};
use crate::types::StorageVolume;

const VIM_PATH: &str = "/sdk";
const VIM_ACTION: &str = "urn:vim25/7.0.3.0";
const CNS_PATH: &str = "/vsanHealth";
const CNS_ACTION: &str = "urn:vsan/vsan.version.version3";
const SESSION_COOKIE: &str = "vmware_soap_session";
const CNS_VOLUME_MANAGER: &str =
    r#"<_this type="CnsVolumeManager">cns-volume-manager</_this>"#;

/// Which SOAP endpoint a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Vim,
    Cns,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::Vim => VIM_PATH,
            Endpoint::Cns => CNS_PATH,
        }
    }

    fn action(self) -> &'static str {
        match self {
            Endpoint::Vim => VIM_ACTION,
            Endpoint::Cns => CNS_ACTION,
        }
    }
}

/// Logged-in vCenter session.
pub struct VcenterClient {
    http: Client,
    base_url: String,
    /// `vmware_soap_session=...` pair replayed in the `Cookie` header.
    cookie: String,
    /// Unquoted session id sent to the CNS endpoint in the SOAP header.
    session_id: String,
    poll_interval: Duration,
    task_timeout: Duration,
}

impl VcenterClient {
    /// Opens an HTTP client and logs in with the resolved credentials.
    pub async fn connect(settings: &SessionSettings, config: &MigrateConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .danger_accept_invalid_certs(settings.cloud_config.insecure)
            .build()?;
        Self::login(
            http,
            settings.cloud_config.sdk_url(),
            &settings.credentials,
            config,
        )
        .await
    }

    async fn login(
        http: Client,
        base_url: String,
        credentials: &Credentials,
        config: &MigrateConfig,
    ) -> Result<Self> {
        let body = format!(
            concat!(
                r#"<Login xmlns="urn:vim25"><_this type="SessionManager">SessionManager</_this>"#,
                "<userName>{}</userName><password>{}</password></Login>"
            ),
            escape(&credentials.username),
            escape(&credentials.password),
        );
        let response = http
            .post(format!("{}{}", base_url, VIM_PATH))
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", VIM_ACTION)
            .body(soap::envelope(None, &body))
            .send()
            .await?;

        let cookie = session_cookie(response.headers());
        let text = response.text().await?;
        match soap::response_body(&text) {
            Ok(_) => {}
            Err(StorageError::Fault(fault)) => return Err(StorageError::Auth(fault.message)),
            Err(e) => return Err(e),
        }
        let cookie = cookie.ok_or_else(|| {
            StorageError::Auth(format!("login response carried no {} cookie", SESSION_COOKIE))
        })?;
        let session_id = session_id(&cookie).to_string();
        if session_id.is_empty() {
            return Err(StorageError::Auth(format!("empty {} cookie", SESSION_COOKIE)));
        }
        debug!(url = %base_url, "vCenter login succeeded");

        Ok(Self {
            http,
            base_url,
            cookie,
            session_id,
            poll_interval: config.task_poll_interval(),
            task_timeout: config.task_timeout(),
        })
    }

    async fn call(&self, endpoint: Endpoint, body: &str) -> Result<Element> {
        let header = match endpoint {
            Endpoint::Cns => Some(soap::session_header(&self.session_id)),
            Endpoint::Vim => None,
        };
        let response = self
            .http
            .post(format!("{}{}", self.base_url, endpoint.path()))
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", endpoint.action())
            .header(COOKIE, self.cookie.as_str())
            .body(soap::envelope(header.as_deref(), body))
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        match soap::response_body(&text) {
            Ok(body) => Ok(body),
            Err(StorageError::Protocol(reason)) if !status.is_success() => Err(
                StorageError::Transport(format!("HTTP {} from {}: {}", status, endpoint.path(), reason)),
            ),
            Err(e) => Err(e),
        }
    }

    async fn find_by_inventory_path(&self, path: &str) -> Result<Option<Element>> {
        let body = format!(
            concat!(
                r#"<FindByInventoryPath xmlns="urn:vim25"><_this type="SearchIndex">SearchIndex</_this>"#,
                "<inventoryPath>{}</inventoryPath></FindByInventoryPath>"
            ),
            escape(path)
        );
        let response = self.call(Endpoint::Vim, &body).await?;
        Ok(response.child("returnval").cloned())
    }

    async fn task_info(&self, task: &TaskHandle) -> Result<Element> {
        let body = format!(
            concat!(
                r#"<RetrievePropertiesEx xmlns="urn:vim25"><_this type="PropertyCollector">propertyCollector</_this>"#,
                "<specSet><propSet><type>Task</type><pathSet>info</pathSet></propSet>",
                r#"<objectSet><obj type="Task">{}</obj></objectSet></specSet><options/></RetrievePropertiesEx>"#
            ),
            escape(&task.id)
        );
        let response = self.call(Endpoint::Vim, &body).await?;
        response
            .find("propSet")
            .and_then(|p| p.child("val"))
            .cloned()
            .ok_or_else(|| StorageError::Protocol(format!("no info returned for task {}", task.id)))
    }

    async fn poll_task(&self, task: &TaskHandle) -> Result<TaskResult> {
        loop {
            let info = self.task_info(task).await?;
            match info.child_text("state").unwrap_or_default() {
                "success" => return Ok(parse_task_result(&info)),
                "error" => {
                    let fault = info
                        .child("error")
                        .map(soap::method_fault)
                        .unwrap_or_else(|| {
                            Fault::new(FaultCategory::Other("TaskError".into()), "task failed")
                        });
                    return Err(StorageError::Fault(fault));
                }
                state => debug!(task = %task.id, state, "waiting for task"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn session_cookie(headers: &HeaderMap<HeaderValue>) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .find(|v| v.starts_with(SESSION_COOKIE))
        .map(str::to_string)
}

/// Session id from a `name=value` cookie pair, without surrounding quotes.
fn session_id(cookie: &str) -> &str {
    cookie
        .split_once('=')
        .map_or(cookie, |(_, v)| v)
        .trim()
        .trim_matches('"')
}

fn query_body(query: &VolumeQuery) -> String {
    let offset = query.cursor.map(|c| c.offset).unwrap_or(0);
    format!(
        concat!(
            r#"<CnsQueryVolume xmlns="urn:vsan">{}<filter>"#,
            r#"<datastores type="{}">{}</datastores>"#,
            "<cursor><offset>{}</offset><limit>{}</limit></cursor>",
            "</filter></CnsQueryVolume>"
        ),
        CNS_VOLUME_MANAGER,
        escape(&query.backend.kind),
        escape(&query.backend.value),
        offset,
        query.page_limit,
    )
}

fn relocate_body(volume_id: &str, destination: &BackendRef) -> String {
    format!(
        concat!(
            r#"<CnsRelocateVolume xmlns="urn:vsan">{}"#,
            r#"<relocateSpecs xsi:type="CnsBlockVolumeRelocateSpec">"#,
            "<volumeId><id>{}</id></volumeId>",
            r#"<datastore type="{}">{}</datastore>"#,
            "</relocateSpecs></CnsRelocateVolume>"
        ),
        CNS_VOLUME_MANAGER,
        escape(volume_id),
        escape(&destination.kind),
        escape(&destination.value),
    )
}

fn parse_query_page(response: &Element, backend: &BackendRef) -> Result<VolumePage> {
    let rv = response
        .child("returnval")
        .ok_or_else(|| StorageError::Protocol("CnsQueryVolume returned no result".into()))?;
    let volumes = rv
        .children_named("volumes")
        .filter_map(|v| v.child("volumeId").and_then(|id| id.child_text("id")))
        .filter(|id| !id.is_empty())
        .map(|id| StorageVolume::new(id, backend.clone()))
        .collect();
    let cursor = rv
        .child("cursor")
        .map(|c| QueryCursor {
            offset: c.child_u64("offset").unwrap_or(0),
            limit: c.child_u64("limit").unwrap_or(0),
            total_records: c.child_u64("totalRecords").unwrap_or(0),
        })
        .unwrap_or_default();
    Ok(VolumePage { volumes, cursor })
}

fn parse_task_result(info: &Element) -> TaskResult {
    let mut results = Vec::new();
    if let Some(result) = info.child("result") {
        result.find_all("volumeResults", &mut results);
    }
    TaskResult {
        volume_results: results
            .into_iter()
            .map(|r| VolumeOperationResult {
                volume_id: r
                    .child("volumeId")
                    .and_then(|v| v.child_text("id"))
                    .map(str::to_string),
                fault: r.child("fault").map(soap::method_fault),
            })
            .collect(),
    }
}

#[async_trait]
impl StorageClient for VcenterClient {
    async fn resolve_backend(&self, datacenter: &str, name: &str) -> Result<BackendRef> {
        if self.find_by_inventory_path(datacenter).await?.is_none() {
            return Err(StorageError::NotFound(format!("can't find datacenter {}", datacenter)));
        }
        let path = format!("{}/datastore/{}", datacenter, name);
        let found = self.find_by_inventory_path(&path).await?.ok_or_else(|| {
            StorageError::NotFound(format!(
                "error finding datastore {} in datacenter {}",
                name, datacenter
            ))
        })?;
        let kind = found.attr("type").unwrap_or("Datastore");
        if kind != "Datastore" {
            return Err(StorageError::NotFound(format!("{} is a {}, not a Datastore", path, kind)));
        }
        Ok(BackendRef::datastore(found.text(), name))
    }

    async fn query_volumes(&self, query: &VolumeQuery) -> Result<VolumePage> {
        let response = self.call(Endpoint::Cns, &query_body(query)).await?;
        parse_query_page(&response, &query.backend)
    }

    async fn relocate_volume(&self, volume_id: &str, destination: &BackendRef) -> Result<TaskHandle> {
        let response = self
            .call(Endpoint::Cns, &relocate_body(volume_id, destination))
            .await?;
        let task = response
            .child_text("returnval")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StorageError::Protocol("CnsRelocateVolume returned no task".into()))?;
        Ok(TaskHandle {
            id: task.to_string(),
        })
    }

    async fn wait_for_task(&self, task: &TaskHandle) -> Result<TaskResult> {
        match tokio::time::timeout(self.task_timeout, self.poll_task(task)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(task = %task.id, "gave up waiting for task");
                Err(StorageError::Timeout {
                    task: task.id.clone(),
                    timeout_secs: self.task_timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ds() -> BackendRef {
        BackendRef::datastore("datastore-7", "gold")
    }

    #[test]
    fn test_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("other=1; Path=/"));
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static(r#"vmware_soap_session="52b1c0"; Path=/; HttpOnly; Secure"#),
        );
        assert_eq!(
            session_cookie(&headers).as_deref(),
            Some(r#"vmware_soap_session="52b1c0""#)
        );
        assert!(session_cookie(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_session_id_strips_quotes() {
        assert_eq!(session_id(r#"vmware_soap_session="52b1c0""#), "52b1c0");
        assert_eq!(session_id("vmware_soap_session=52b1c0"), "52b1c0");
        assert_eq!(session_id(r#"vmware_soap_session="""#), "");
    }

    #[test]
    fn test_query_body_first_page() {
        let body = query_body(&VolumeQuery {
            backend: ds(),
            cursor: None,
            page_limit: 50,
        });
        assert!(body.contains(r#"<datastores type="Datastore">datastore-7</datastores>"#));
        assert!(body.contains("<offset>0</offset><limit>50</limit>"));
    }

    #[test]
    fn test_query_body_follows_cursor() {
        let body = query_body(&VolumeQuery {
            backend: ds(),
            cursor: Some(QueryCursor {
                offset: 100,
                limit: 100,
                total_records: 250,
            }),
            page_limit: 100,
        });
        assert!(body.contains("<offset>100</offset>"));
    }

    #[test]
    fn test_relocate_body() {
        let body = relocate_body("f1e2-<id>", &ds());
        assert!(body.contains("<id>f1e2-&lt;id&gt;</id>"));
        assert!(body.contains(r#"xsi:type="CnsBlockVolumeRelocateSpec""#));
        assert!(body.contains(r#"<datastore type="Datastore">datastore-7</datastore>"#));
    }

    #[test]
    fn test_parse_query_page() {
        let xml = r#"<Envelope><Body><CnsQueryVolumeResponse xmlns="urn:vsan"><returnval>
            <volumes><volumeId><id>vol-a</id></volumeId><datastoreUrl>ds:///a/</datastoreUrl></volumes>
            <volumes><volumeId><id>vol-b</id></volumeId></volumes>
            <cursor><offset>2</offset><limit>100</limit><totalRecords>2</totalRecords></cursor>
        </returnval></CnsQueryVolumeResponse></Body></Envelope>"#;
        let body = soap::response_body(xml).unwrap();
        let page = parse_query_page(&body, &ds()).unwrap();
        let ids: Vec<_> = page.volumes.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["vol-a", "vol-b"]);
        assert_eq!(page.cursor.offset, 2);
        assert_eq!(page.cursor.total_records, 2);
        assert_eq!(page.volumes[0].backend, ds());
    }

    #[test]
    fn test_parse_task_result_with_fault() {
        let xml = r#"<val xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="TaskInfo">
            <state>success</state>
            <result xsi:type="CnsVolumeOperationBatchResult">
              <volumeResults xsi:type="CnsVolumeOperationResult">
                <volumeId><id>vol-a</id></volumeId>
                <fault>
                  <fault xsi:type="NotSupported"/>
                  <localizedMessage>relocation of attached volume not supported</localizedMessage>
                </fault>
              </volumeResults>
            </result>
        </val>"#;
        let info = soap::parse(xml).unwrap();
        let result = parse_task_result(&info);
        assert_eq!(result.volume_results.len(), 1);
        assert_eq!(result.volume_results[0].volume_id.as_deref(), Some("vol-a"));
        let fault = result.first_fault().unwrap();
        assert_eq!(fault.category, FaultCategory::NotSupported);
        assert_eq!(fault.message, "relocation of attached volume not supported");
    }

    #[test]
    fn test_parse_task_result_clean() {
        let info = soap::parse(
            "<val><state>success</state><result><volumeResults><volumeId><id>v</id></volumeId></volumeResults></result></val>",
        )
        .unwrap();
        assert!(parse_task_result(&info).first_fault().is_none());
    }

    mod live {
        use super::*;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Mutex};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};

        const SESSION: &str = "52b1c0";

        struct Reply {
            status: u16,
            headers: Vec<(&'static str, String)>,
            body: String,
        }

        fn soap_reply(body: &str) -> Reply {
            Reply {
                status: 200,
                headers: Vec::new(),
                body: format!(
                    concat!(
                        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                        r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">"#,
                        "<soapenv:Body>{}</soapenv:Body></soapenv:Envelope>"
                    ),
                    body
                ),
            }
        }

        fn login_reply() -> Reply {
            let mut reply = soap_reply(
                r#"<LoginResponse xmlns="urn:vim25"><returnval><key>k</key></returnval></LoginResponse>"#,
            );
            reply.headers.push((
                "set-cookie",
                format!(r#"vmware_soap_session="{}"; Path=/; HttpOnly; Secure"#, SESSION),
            ));
            reply
        }

        fn task_reply(info: &str) -> Reply {
            soap_reply(&format!(
                concat!(
                    r#"<RetrievePropertiesExResponse xmlns="urn:vim25"><returnval><objects>"#,
                    r#"<obj type="Task">task-9</obj><propSet><name>info</name><val>{}</val></propSet>"#,
                    "</objects></returnval></RetrievePropertiesExResponse>"
                ),
                info
            ))
        }

        struct FakeVcenter {
            url: String,
            requests: Arc<Mutex<Vec<String>>>,
        }

        impl FakeVcenter {
            fn requests(&self) -> Vec<String> {
                self.requests.lock().unwrap().clone()
            }
        }

        async fn read_request(stream: &mut TcpStream) -> String {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .filter_map(|l| l.split_once(':'))
                        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            String::from_utf8_lossy(&buf).into_owned()
        }

        /// Serves one scripted reply per connection until the test ends.
        async fn serve<F>(respond: F) -> FakeVcenter
        where
            F: Fn(&str) -> Reply + Send + Sync + 'static,
        {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = requests.clone();
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    let raw = read_request(&mut stream).await;
                    let reply = respond(&raw);
                    seen.lock().unwrap().push(raw);
                    let reason = if reply.status == 200 { "OK" } else { "Error" };
                    let mut head = format!(
                        "HTTP/1.1 {} {}\r\ncontent-type: text/xml\r\ncontent-length: {}\r\nconnection: close\r\n",
                        reply.status,
                        reason,
                        reply.body.len()
                    );
                    for (name, value) in &reply.headers {
                        head.push_str(&format!("{}: {}\r\n", name, value));
                    }
                    head.push_str("\r\n");
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(reply.body.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
            });
            FakeVcenter { url, requests }
        }

        fn credentials() -> Credentials {
            Credentials {
                username: "administrator@vsphere.local".into(),
                password: "s3cret".into(),
            }
        }

        fn config() -> MigrateConfig {
            MigrateConfig {
                task_poll_interval_ms: 10,
                request_timeout_secs: 5,
                ..MigrateConfig::default()
            }
        }

        async fn login(server: &FakeVcenter) -> Result<VcenterClient> {
            let http = Client::builder().no_proxy().build().unwrap();
            VcenterClient::login(http, server.url.clone(), &credentials(), &config()).await
        }

        fn task() -> TaskHandle {
            TaskHandle {
                id: "task-9".into(),
            }
        }

        #[tokio::test]
        async fn test_login_captures_session() {
            let server = serve(|_| login_reply()).await;
            let client = login(&server).await.unwrap();
            assert_eq!(client.cookie, format!(r#"vmware_soap_session="{}""#, SESSION));
            assert_eq!(client.session_id, SESSION);

            let requests = server.requests();
            assert_eq!(requests.len(), 1);
            assert!(requests[0].starts_with("POST /sdk "));
            assert!(requests[0].contains("<userName>administrator@vsphere.local</userName>"));
        }

        #[tokio::test]
        async fn test_login_without_cookie_is_auth_error() {
            let server = serve(|_| soap_reply("<LoginResponse/>")).await;
            let err = login(&server).await.err().unwrap();
            assert!(matches!(err, StorageError::Auth(_)));
        }

        #[tokio::test]
        async fn test_login_fault_is_auth_error() {
            let server = serve(|_| {
                soap_reply(concat!(
                    "<soapenv:Fault><faultcode>ServerFaultCode</faultcode>",
                    "<faultstring>Cannot complete login due to an incorrect user name or password.</faultstring>",
                    "<detail><InvalidLoginFault/></detail></soapenv:Fault>"
                ))
            })
            .await;
            match login(&server).await.err().unwrap() {
                StorageError::Auth(msg) => assert!(msg.contains("incorrect user name")),
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_cns_calls_carry_session_in_soap_header() {
            let server = serve(|raw| {
                if raw.contains("<Login ") {
                    login_reply()
                } else {
                    soap_reply(concat!(
                        r#"<CnsQueryVolumeResponse xmlns="urn:vsan"><returnval>"#,
                        "<volumes><volumeId><id>vol-a</id></volumeId></volumes>",
                        "<cursor><offset>1</offset><limit>100</limit><totalRecords>1</totalRecords></cursor>",
                        "</returnval></CnsQueryVolumeResponse>"
                    ))
                }
            })
            .await;
            let client = login(&server).await.unwrap();
            let page = client
                .query_volumes(&VolumeQuery {
                    backend: ds(),
                    cursor: None,
                    page_limit: 100,
                })
                .await
                .unwrap();
            assert_eq!(page.volumes.len(), 1);

            let raw = server.requests().pop().unwrap();
            assert!(raw.starts_with("POST /vsanHealth "));
            assert!(raw.contains(
                "<soapenv:Header><vcSessionCookie>52b1c0</vcSessionCookie></soapenv:Header>"
            ));
            let lower = raw.to_lowercase();
            assert!(lower.contains("cookie: vmware_soap_session=\"52b1c0\""));
            assert!(!lower.contains("vcsessioncookie:"));
        }

        #[tokio::test]
        async fn test_vim_calls_have_no_soap_header() {
            let server = serve(|raw| {
                if raw.contains("<Login ") {
                    login_reply()
                } else {
                    soap_reply(concat!(
                        r#"<FindByInventoryPathResponse xmlns="urn:vim25">"#,
                        r#"<returnval type="Datacenter">datacenter-3</returnval>"#,
                        "</FindByInventoryPathResponse>"
                    ))
                }
            })
            .await;
            let client = login(&server).await.unwrap();
            let found = client.find_by_inventory_path("DC1").await.unwrap();
            assert_eq!(found.map(|e| e.text().to_string()).as_deref(), Some("datacenter-3"));
            let raw = server.requests().pop().unwrap();
            assert!(raw.starts_with("POST /sdk "));
            assert!(!raw.contains("soapenv:Header"));
        }

        #[tokio::test]
        async fn test_server_error_without_soap_body_is_transport() {
            let server = serve(|raw| {
                if raw.contains("<Login ") {
                    login_reply()
                } else {
                    Reply {
                        status: 500,
                        headers: Vec::new(),
                        body: "Internal Server Error".into(),
                    }
                }
            })
            .await;
            let client = login(&server).await.unwrap();
            match client.relocate_volume("vol-a", &ds()).await.unwrap_err() {
                StorageError::Transport(msg) => {
                    assert!(msg.contains("500"));
                    assert!(msg.contains("/vsanHealth"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_task_polled_until_success() {
            let polls = Arc::new(AtomicUsize::new(0));
            let counter = polls.clone();
            let server = serve(move |raw| {
                if raw.contains("<Login ") {
                    return login_reply();
                }
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => task_reply("<state>queued</state>"),
                    1 => task_reply("<state>running</state><progress>40</progress>"),
                    _ => task_reply(concat!(
                        "<state>success</state><result><volumeResults>",
                        "<volumeId><id>vol-a</id></volumeId></volumeResults></result>"
                    )),
                }
            })
            .await;
            let client = login(&server).await.unwrap();
            let result = client.wait_for_task(&task()).await.unwrap();
            assert_eq!(polls.load(Ordering::SeqCst), 3);
            assert_eq!(result.volume_results.len(), 1);
            assert!(result.first_fault().is_none());
        }

        #[tokio::test]
        async fn test_task_error_state_is_fault() {
            let server = serve(|raw| {
                if raw.contains("<Login ") {
                    return login_reply();
                }
                task_reply(concat!(
                    r#"<state>error</state><error xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
                    r#"<fault xsi:type="AlreadyExists"/>"#,
                    "<localizedMessage>volume already on datastore</localizedMessage></error>"
                ))
            })
            .await;
            let client = login(&server).await.unwrap();
            let err = client.wait_for_task(&task()).await.unwrap_err();
            let fault = err.fault().unwrap();
            assert_eq!(fault.category, FaultCategory::AlreadyExists);
            assert_eq!(fault.message, "volume already on datastore");
        }

        #[tokio::test]
        async fn test_task_that_never_finishes_times_out() {
            let server = serve(|raw| {
                if raw.contains("<Login ") {
                    login_reply()
                } else {
                    task_reply("<state>running</state>")
                }
            })
            .await;
            let mut client = login(&server).await.unwrap();
            client.task_timeout = Duration::from_millis(150);
            match client.wait_for_task(&task()).await.unwrap_err() {
                StorageError::Timeout { task, .. } => assert_eq!(task, "task-9"),
                other => panic!("unexpected error: {other}"),
            }
            assert!(server.requests().len() > 1);
        }
    }
}
