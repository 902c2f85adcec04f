use bridge_core::{MessageEncoding, ProviderError, SendOptions, Transaction};
use js_sys::{Array, Function, Object, Promise, Reflect, Uint8Array};
use log::{debug, warn};
use serde::Serialize;
use std::rc::Rc;
use wasm_bindgen::{prelude::*, JsCast};
use wasm_bindgen_futures::future_to_promise;
use web_sys::{CustomEvent, CustomEventInit, Event, MessageEvent, Window};

use crate::{
    standard::{
        AnnouncementWindow, StandardWallet, WalletDescriptor, APP_READY_EVENT, CONNECT_FEATURE,
        DISCONNECT_FEATURE, EVENTS_FEATURE, REGISTER_WALLET_EVENT, SIGN_AND_SEND_TRANSACTION_FEATURE,
        SIGN_MESSAGE_FEATURE, SIGN_TRANSACTION_FEATURE,
    },
    Provider, Transport,
};

const REACT_NATIVE_BRIDGE: &str = "ReactNativeWebView";

fn to_js_error(e: ProviderError) -> JsValue {
    let error = Object::new();
    let _ = Reflect::set(&error, &"code".into(), &JsValue::from(e.code));
    let _ = Reflect::set(&error, &"message".into(), &JsValue::from_str(&e.message));
    error.into()
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

fn window() -> Result<Window, JsValue> {
    web_sys::window().ok_or_else(|| JsValue::from_str("no global window"))
}

/// Posts to the native webview bridge when present, the parent frame otherwise
struct WindowTransport {
    window: Window,
}

impl Transport for WindowTransport {
    fn post(&self, message: String) -> Result<(), ProviderError> {
        let native = Reflect::get(&self.window, &REACT_NATIVE_BRIDGE.into())
            .ok()
            .filter(|bridge| !bridge.is_undefined() && !bridge.is_null());

        if let Some(bridge) = native {
            let post = Reflect::get(&bridge, &"postMessage".into())
                .ok()
                .and_then(|f| f.dyn_into::<Function>().ok())
                .ok_or_else(|| ProviderError::unexpected("webview bridge has no postMessage"))?;
            post.call1(&bridge, &JsValue::from_str(&message))
                .map_err(|e| ProviderError::unexpected(format!("{:?}", e)))?;
            return Ok(());
        }

        let parent = self
            .window
            .parent()
            .ok()
            .flatten()
            .ok_or_else(|| ProviderError::unexpected("no host frame to post to"))?;
        parent
            .post_message(&JsValue::from_str(&message), "*")
            .map_err(|e| ProviderError::unexpected(format!("{:?}", e)))
    }
}

#[wasm_bindgen]
pub struct WalletProvider {
    inner: Rc<Provider>,
}

#[wasm_bindgen]
impl WalletProvider {
    /// Install the provider on the current window. `secret` is the hex encoded
    /// channel secret shared with the host.
    #[wasm_bindgen(constructor)]
    pub fn new(secret: &str) -> Result<WalletProvider, JsValue> {
        let secret = hex::decode(secret).map_err(|e| JsValue::from_str(&e.to_string()))?;
        let window = window()?;
        let transport = Rc::new(WindowTransport {
            window: window.clone(),
        });
        let inner = Rc::new(Provider::new(transport, secret));

        let listener = inner.clone();
        let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Some(raw) = event.data().as_string() {
                listener.handle_message(&raw);
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        window.add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())?;
        on_message.forget();

        debug!("Wallet provider installed");
        Ok(WalletProvider { inner })
    }

    #[wasm_bindgen(getter, js_name = "publicKey")]
    pub fn public_key(&self) -> Option<String> {
        self.inner.public_key()
    }

    #[wasm_bindgen(getter, js_name = "isConnected")]
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    #[wasm_bindgen]
    pub async fn connect(&self) -> Result<String, JsValue> {
        let inner = self.inner.clone();
        inner.connect().await.map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub async fn disconnect(&self) -> Result<(), JsValue> {
        let inner = self.inner.clone();
        inner.disconnect().await.map_err(to_js_error)
    }

    #[wasm_bindgen(js_name = "signMessage")]
    pub async fn sign_message(&self, message: Vec<u8>, encoding: Option<String>) -> Result<JsValue, JsValue> {
        let inner = self.inner.clone();
        let encoding = MessageEncoding::from_label(encoding.as_deref().unwrap_or("utf8"));
        let signed = inner
            .sign_message(&message, encoding)
            .await
            .map_err(to_js_error)?;
        signed_message_object(&signed.signature, &signed.public_key)
    }

    #[wasm_bindgen(js_name = "signTransaction")]
    pub async fn sign_transaction(&self, transaction: Vec<u8>) -> Result<Vec<u8>, JsValue> {
        let inner = self.inner.clone();
        let transaction = parse_transaction(&transaction)?;
        let signed = inner
            .sign_transaction(&transaction)
            .await
            .map_err(to_js_error)?;
        serialize_transaction(&signed)
    }

    #[wasm_bindgen(js_name = "signAllTransactions")]
    pub async fn sign_all_transactions(&self, transactions: Array) -> Result<Array, JsValue> {
        let inner = self.inner.clone();
        let transactions = parse_transactions(&transactions)?;
        let signed = inner
            .sign_all_transactions(&transactions)
            .await
            .map_err(to_js_error)?;
        signed
            .iter()
            .map(|tx| serialize_transaction(tx).map(|bytes| JsValue::from(Uint8Array::from(bytes.as_slice()))))
            .collect()
    }

    #[wasm_bindgen(js_name = "signAndSendTransaction")]
    pub async fn sign_and_send_transaction(
        &self,
        transaction: Vec<u8>,
        options: JsValue,
    ) -> Result<JsValue, JsValue> {
        let inner = self.inner.clone();
        let transaction = parse_transaction(&transaction)?;
        let options = parse_options(options)?;
        let result = inner
            .sign_and_send_transaction(&transaction, options)
            .await
            .map_err(to_js_error)?;
        to_js(&result)
    }

    #[wasm_bindgen(js_name = "signAndSendAllTransactions")]
    pub async fn sign_and_send_all_transactions(
        &self,
        transactions: Array,
        options: JsValue,
    ) -> Result<JsValue, JsValue> {
        let inner = self.inner.clone();
        let transactions = parse_transactions(&transactions)?;
        let options = parse_options(options)?;
        let results = inner
            .sign_and_send_all_transactions(&transactions, options)
            .await
            .map_err(to_js_error)?;
        to_js(&results)
    }

    /// Subscribe to host events (`connect`, `disconnect`, ...)
    #[wasm_bindgen]
    pub fn on(&self, event: &str, listener: Function) {
        self.inner.on(event, move |args| {
            let args: Array = args
                .iter()
                .filter_map(|arg| to_js(arg).ok())
                .collect();
            if let Err(e) = listener.apply(&JsValue::NULL, &args) {
                warn!("Event listener threw: {:?}", e);
            }
        });
    }

    /// Announce the wallet to wallet-standard aware page code
    #[wasm_bindgen(js_name = "registerStandardWallet")]
    pub fn register_standard_wallet(&self, name: &str, icon: &str) -> Result<(), JsValue> {
        let wallet = Rc::new(StandardWallet::new(self.inner.clone(), name, icon));
        let window = JsAnnouncementWindow {
            window: window()?,
            provider: self.inner.clone(),
        };
        wallet.register(&window).map_err(to_js_error)
    }
}

fn parse_transaction(bytes: &[u8]) -> Result<Transaction, JsValue> {
    Transaction::decode(bytes).map_err(|e| JsValue::from_str(&e.to_string()))
}

fn serialize_transaction(transaction: &Transaction) -> Result<Vec<u8>, JsValue> {
    transaction
        .serialize()
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

fn parse_transactions(transactions: &Array) -> Result<Vec<Transaction>, JsValue> {
    transactions
        .iter()
        .map(|tx| parse_transaction(&Uint8Array::new(&tx).to_vec()))
        .collect()
}

fn parse_options(options: JsValue) -> Result<Option<SendOptions>, JsValue> {
    if options.is_undefined() || options.is_null() {
        return Ok(None);
    }
    serde_wasm_bindgen::from_value(options)
        .map(Some)
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

fn signed_message_object(signature: &[u8], public_key: &str) -> Result<JsValue, JsValue> {
    let object = Object::new();
    Reflect::set(
        &object,
        &"signature".into(),
        &Uint8Array::from(signature).into(),
    )?;
    Reflect::set(&object, &"publicKey".into(), &JsValue::from_str(public_key))?;
    Ok(object.into())
}

struct JsAnnouncementWindow {
    window: Window,
    provider: Rc<Provider>,
}

impl JsAnnouncementWindow {
    fn dispatch(&self, name: &str, detail: &JsValue) -> Result<(), ProviderError> {
        let init = CustomEventInit::new();
        init.set_detail(detail);
        let event = CustomEvent::new_with_event_init_dict(name, &init)
            .map_err(|e| ProviderError::unexpected(format!("{:?}", e)))?;
        self.window
            .dispatch_event(&event)
            .map_err(|e| ProviderError::unexpected(format!("{:?}", e)))?;
        Ok(())
    }
}

impl AnnouncementWindow for JsAnnouncementWindow {
    fn dispatch_register(&self, wallet: &WalletDescriptor) -> Result<(), ProviderError> {
        let wallet = wallet_object(wallet, &self.provider)
            .map_err(|e| ProviderError::unexpected(format!("{:?}", e)))?;

        // detail is `({ register }) => register(wallet)`
        let callback = Closure::wrap(Box::new(move |api: JsValue| {
            call_register(&api, &wallet);
        }) as Box<dyn FnMut(JsValue)>);
        self.dispatch(REGISTER_WALLET_EVENT, callback.as_ref())?;
        callback.forget();
        Ok(())
    }

    fn on_app_ready(&self, describe: Box<dyn Fn() -> WalletDescriptor>) -> Result<(), ProviderError> {
        let provider = self.provider.clone();
        let listener = Closure::wrap(Box::new(move |event: Event| {
            let Some(api) = event.dyn_ref::<CustomEvent>().map(CustomEvent::detail) else {
                return;
            };
            match wallet_object(&describe(), &provider) {
                Ok(wallet) => call_register(&api, &wallet),
                Err(e) => warn!("Failed to build wallet for app-ready: {:?}", e),
            }
        }) as Box<dyn FnMut(Event)>);
        self.window
            .add_event_listener_with_callback(APP_READY_EVENT, listener.as_ref().unchecked_ref())
            .map_err(|e| ProviderError::unexpected(format!("{:?}", e)))?;
        listener.forget();
        Ok(())
    }
}

fn call_register(api: &JsValue, wallet: &JsValue) {
    let register = Reflect::get(api, &"register".into())
        .ok()
        .and_then(|f| f.dyn_into::<Function>().ok());
    match register {
        Some(register) => {
            if let Err(e) = register.call1(&JsValue::NULL, wallet) {
                warn!("Wallet registration threw: {:?}", e);
            }
        }
        None => debug!("Discovery api without register()"),
    }
}

/// The descriptor as plain data, with the feature methods attached
fn wallet_object(descriptor: &WalletDescriptor, provider: &Rc<Provider>) -> Result<JsValue, JsValue> {
    let wallet = to_js(descriptor)?;
    let features = Reflect::get(&wallet, &"features".into())?;

    let p = provider.clone();
    attach(&features, CONNECT_FEATURE, "connect", move |_| {
        let p = p.clone();
        future_to_promise(async move {
            let address = p.connect().await.map_err(to_js_error)?;
            let accounts = Array::of1(&JsValue::from_str(&address));
            let result = Object::new();
            Reflect::set(&result, &"accounts".into(), &accounts)?;
            Ok(result.into())
        })
    })?;

    let p = provider.clone();
    attach(&features, DISCONNECT_FEATURE, "disconnect", move |_| {
        let p = p.clone();
        future_to_promise(async move {
            p.disconnect().await.map_err(to_js_error)?;
            Ok(JsValue::UNDEFINED)
        })
    })?;

    let p = provider.clone();
    let on = Closure::wrap(Box::new(move |event: JsValue, listener: JsValue| -> JsValue {
        let (Some(event), Ok(listener)) = (event.as_string(), listener.dyn_into::<Function>()) else {
            return JsValue::UNDEFINED;
        };
        let id = p.on(&event, move |args| {
            let args: Array = args.iter().filter_map(|arg| to_js(arg).ok()).collect();
            let _ = listener.apply(&JsValue::NULL, &args);
        });
        let p = p.clone();
        Closure::once_into_js(move || {
            p.off(&event, id);
        })
    }) as Box<dyn FnMut(JsValue, JsValue) -> JsValue>);
    Reflect::set(
        &Reflect::get(&features, &EVENTS_FEATURE.into())?,
        &"on".into(),
        &on.into_js_value(),
    )?;

    let p = provider.clone();
    attach(&features, SIGN_MESSAGE_FEATURE, "signMessage", move |input| {
        let p = p.clone();
        future_to_promise(async move {
            let message = Uint8Array::new(&Reflect::get(&input, &"message".into())?).to_vec();
            let signed = p
                .sign_message(&message, MessageEncoding::Utf8)
                .await
                .map_err(to_js_error)?;
            let result = Object::new();
            Reflect::set(&result, &"signedMessage".into(), &Uint8Array::from(message.as_slice()))?;
            Reflect::set(
                &result,
                &"signature".into(),
                &Uint8Array::from(signed.signature.as_slice()),
            )?;
            Ok(result.into())
        })
    })?;

    let p = provider.clone();
    attach(&features, SIGN_TRANSACTION_FEATURE, "signTransaction", move |input| {
        let p = p.clone();
        future_to_promise(async move {
            let bytes = Uint8Array::new(&Reflect::get(&input, &"transaction".into())?).to_vec();
            let signed = p
                .sign_transaction(&parse_transaction(&bytes)?)
                .await
                .map_err(to_js_error)?;
            let result = Object::new();
            Reflect::set(
                &result,
                &"signedTransaction".into(),
                &Uint8Array::from(serialize_transaction(&signed)?.as_slice()),
            )?;
            Ok(result.into())
        })
    })?;

    let p = provider.clone();
    attach(
        &features,
        SIGN_AND_SEND_TRANSACTION_FEATURE,
        "signAndSendTransaction",
        move |input| {
            let p = p.clone();
            future_to_promise(async move {
                let bytes = Uint8Array::new(&Reflect::get(&input, &"transaction".into())?).to_vec();
                let options = parse_options(Reflect::get(&input, &"options".into())?)?;
                let sent = p
                    .sign_and_send_transaction(&parse_transaction(&bytes)?, options)
                    .await
                    .map_err(to_js_error)?;
                let signature = bs58::decode(&sent.signature)
                    .into_vec()
                    .map_err(|e| JsValue::from_str(&e.to_string()))?;
                let result = Object::new();
                Reflect::set(
                    &result,
                    &"signature".into(),
                    &Uint8Array::from(signature.as_slice()),
                )?;
                Ok(result.into())
            })
        },
    )?;

    Ok(wallet)
}

fn attach(
    features: &JsValue,
    feature: &str,
    method: &str,
    f: impl FnMut(JsValue) -> Promise + 'static,
) -> Result<(), JsValue> {
    let target = Reflect::get(features, &feature.into())?;
    let f = Closure::wrap(Box::new(f) as Box<dyn FnMut(JsValue) -> Promise>);
    Reflect::set(&target, &method.into(), &f.into_js_value())?;
    Ok(())
}
