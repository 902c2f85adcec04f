use bridge::{
    domain::{ApprovalAction, ApprovalRequest, Approvals, Bridge, BridgeConfig, MethodDispatcher},
    infra::{
        rpc_mock::MockRpc,
        secrets::{ChannelSecret, SecretKeyHandler},
        signer::{LocalSigner, SigningBackend},
        signer_mock::MockSigner,
    },
    startup::{app, AppState, WalletInfo},
};
use bridge_core::{
    decode, encode, sign_request,
    transaction::{v0, Hash, Message, MessageHeader, Pubkey, VersionedMessage},
    Envelope, ProviderError, Transaction, UnsignedRequest, SOLANA_NETWORK,
};
use futures::{SinkExt, StreamExt};
use reqwest_middleware::reqwest::Client;
use serde_json::Value;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;
use bridge_provider::Provider;
use ed25519_dalek::SigningKey;
use std::{
    future::Future,
    rc::Rc,
    sync::{Arc, Mutex, Once},
    time::Duration,
};
use tokio::{select, sync::mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

static INIT_LOGGER: Once = Once::new();

pub fn setup_static_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn wallet_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

/// Single-signer transaction with one extra readonly account. A zero
/// blockhash is filled in by the signer before broadcast.
pub fn transaction(signer: [u8; 32], blockhash: [u8; 32], versioned: bool) -> Transaction {
    let header = MessageHeader {
        num_required_signatures: 1,
        num_readonly_signed_accounts: 0,
        num_readonly_unsigned_accounts: 1,
    };
    let account_keys = vec![Pubkey::new_from_array(signer), Pubkey::new_from_array([9u8; 32])];
    let recent_blockhash = Hash::new_from_array(blockhash);

    let message = if versioned {
        VersionedMessage::V0(v0::Message {
            header,
            account_keys,
            recent_blockhash,
            instructions: vec![],
            address_table_lookups: vec![],
        })
    } else {
        VersionedMessage::Legacy(Message {
            header,
            account_keys,
            recent_blockhash,
            instructions: vec![],
        })
    };
    Transaction::from_message(message).unwrap()
}

/// Answers every gate with a fixed action and remembers what it was shown
pub struct AutoApprover {
    pub seen: Arc<Mutex<Vec<ApprovalRequest>>>,
}

impl AutoApprover {
    pub fn spawn(approvals: Arc<Approvals>, action: ApprovalAction) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let mut feed = approvals.subscribe();
        tokio::spawn(async move {
            while let Ok(request) = feed.recv().await {
                record.lock().unwrap().push(request.clone());
                approvals.resolve(request.id, action).await;
            }
        });
        Self { seen }
    }

    pub fn seen(&self) -> Vec<ApprovalRequest> {
        self.seen.lock().unwrap().clone()
    }
}

/// A page provider wired to a host bridge through in-memory pipes
pub struct Harness {
    pub provider: Rc<Provider>,
    pub bridge: Bridge,
    pub approvals: Arc<Approvals>,
    pub secret: Arc<ChannelSecret>,
    to_host: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    to_page: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    pub tracker: TaskTracker,
    pub cancel: CancellationToken,
}

pub struct HarnessBuilder {
    signer: Arc<dyn SigningBackend>,
    approval_timeout: Duration,
    enforce_signatures: bool,
    page_secret: Option<Vec<u8>>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            signer: Arc::new(MockSigner::default()),
            approval_timeout: Duration::from_secs(5),
            enforce_signatures: true,
            page_secret: None,
        }
    }
}

impl HarnessBuilder {
    pub fn signer(mut self, signer: Arc<dyn SigningBackend>) -> Self {
        self.signer = signer;
        self
    }

    pub fn local_signer(self, rpc: MockRpc) -> Self {
        self.signer(Arc::new(LocalSigner::new(wallet_key(), Arc::new(rpc))))
    }

    pub fn approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    pub fn enforce_signatures(mut self, enforce: bool) -> Self {
        self.enforce_signatures = enforce;
        self
    }

    /// Page signs with a secret the host does not share
    pub fn page_secret(mut self, secret: &[u8]) -> Self {
        self.page_secret = Some(secret.to_vec());
        self
    }

    pub fn build(self) -> Harness {
        setup_static_logger();
        let approvals = Arc::new(Approvals::new(self.approval_timeout));
        let dispatcher = Arc::new(MethodDispatcher::new(self.signer, approvals.clone()));
        let secret = Arc::new(ChannelSecret::generate());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        let (host_tx, to_page) = mpsc::unbounded_channel::<String>();
        let bridge = Bridge::new(
            BridgeConfig {
                secret: secret.clone(),
                enforce_request_signatures: self.enforce_signatures,
                network: SOLANA_NETWORK.to_string(),
            },
            dispatcher,
            Arc::new(host_tx),
            &tracker,
            &cancel,
        );

        let (page_tx, to_host) = mpsc::unbounded_channel::<String>();
        let transport = move |message: String| -> Result<(), ProviderError> {
            page_tx
                .send(message)
                .map_err(|_| ProviderError::unexpected("host gone"))
        };
        let page_secret = self
            .page_secret
            .unwrap_or_else(|| secret.expose().to_vec());
        let provider = Rc::new(Provider::new(Rc::new(transport), page_secret));

        Harness {
            provider,
            bridge,
            approvals,
            secret,
            to_host: tokio::sync::Mutex::new(to_host),
            to_page: tokio::sync::Mutex::new(to_page),
            tracker,
            cancel,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Run a page-side future while shuttling messages in both directions
    pub async fn drive<T>(&self, fut: impl Future<Output = T>) -> T {
        let mut to_host = self.to_host.lock().await;
        let mut to_page = self.to_page.lock().await;
        let mut fut = std::pin::pin!(fut);
        let deadline = tokio::time::sleep(Duration::from_secs(10));
        tokio::pin!(deadline);

        loop {
            select! {
                biased;
                out = &mut fut => return out,
                Some(raw) = to_host.recv() => {
                    let _ = self.bridge.on_message(&raw).await;
                }
                Some(raw) = to_page.recv() => self.provider.handle_message(&raw),
                _ = &mut deadline => panic!("page future did not settle"),
            }
        }
    }

    /// Let both sides exchange whatever is in flight
    pub async fn settle(&self) {
        self.drive(tokio::time::sleep(Duration::from_millis(50))).await
    }

    /// Deliver one raw frame to the host as if the page sent it
    pub async fn inject(&self, raw: &str) {
        let _ = self.bridge.on_message(raw).await;
    }

    pub async fn shutdown(self) {
        self.bridge.shutdown();
        self.settle().await;
        self.cancel.cancel();
        self.tracker.close();
        tokio::time::timeout(Duration::from_secs(2), self.tracker.wait())
            .await
            .unwrap();
    }
}

/// The full router served on an ephemeral port
pub struct TestApp {
    pub address: SocketAddr,
    pub state: AppState,
    pub client: Client,
    server: CancellationToken,
}

pub type PageSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl TestApp {
    pub async fn spawn(signer: Arc<dyn SigningBackend>) -> Self {
        setup_static_logger();
        let approvals = Arc::new(Approvals::new(Duration::from_secs(5)));
        let dispatcher = Arc::new(MethodDispatcher::new(signer.clone(), approvals.clone()));
        let state = AppState {
            approvals,
            dispatcher,
            bridge_config: BridgeConfig {
                secret: Arc::new(ChannelSecret::generate()),
                enforce_request_signatures: true,
                network: SOLANA_NETWORK.to_string(),
            },
            wallet: WalletInfo {
                name: String::from("Test Wallet"),
                icon: String::from("data:image/svg+xml;base64,"),
                network: SOLANA_NETWORK.to_string(),
                public_key: signer.public_key().to_string(),
            },
            background_tasks: TaskTracker::new(),
            cancel_token: CancellationToken::new(),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = CancellationToken::new();
        let stop = server.clone();
        let router = app(state.clone(), vec![]);
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            address,
            state,
            client: Client::new(),
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    pub async fn pending_approvals(&self) -> Vec<Value> {
        self.client
            .get(self.url("/api/v1/approvals/"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Poll the approval list until a gate shows up
    pub async fn wait_for_approval(&self) -> Value {
        for _ in 0..100 {
            if let Some(first) = self.pending_approvals().await.into_iter().next() {
                return first;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no approval opened");
    }

    pub async fn resolve(&self, id: &str, action: &str) -> u16 {
        self.client
            .post(self.url(&format!("/api/v1/approvals/{}", id)))
            .json(&serde_json::json!({ "action": action }))
            .send()
            .await
            .unwrap()
            .status()
            .as_u16()
    }

    pub async fn open_page(&self) -> PageSocket {
        let (socket, _) = connect_async(format!("ws://{}/bridge/ws", self.address))
            .await
            .unwrap();
        socket
    }

    /// Send a request signed with the host's channel secret, returning its id
    pub async fn send_signed(&self, socket: &mut PageSocket, method: &str, context: Value) -> Uuid {
        let request = sign_request(
            self.state.bridge_config.secret.expose(),
            UnsignedRequest::new(method, context),
        )
        .unwrap();
        let id = request.id();
        let raw = encode(&request.into()).unwrap();
        socket.send(tungstenite::Message::text(raw)).await.unwrap();
        id
    }

    pub async fn shutdown(self) {
        self.state.cancel_token.cancel();
        self.server.cancel();
        self.state.background_tasks.close();
        tokio::time::timeout(Duration::from_secs(2), self.state.background_tasks.wait())
            .await
            .unwrap();
    }
}

/// Next protocol envelope from the host, skipping control frames
pub async fn next_envelope(socket: &mut PageSocket) -> Envelope {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("host went quiet")
            .expect("socket closed")
            .unwrap();
        if let tungstenite::Message::Text(text) = frame {
            if let Some(envelope) = decode(text.as_str()) {
                return envelope;
            }
        }
    }
}
