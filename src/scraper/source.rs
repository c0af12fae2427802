//! 上流のチャットイベント取得の抽象化

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use super::pool::ResourceFactory;
use crate::error::TransportError;
use crate::models::{ChatMessage, VideoId};

/// 上流から届くイベント
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Chat(ChatMessage),
    /// 投げ銭（`donation_amount_raw` に金額文字列を持つ）
    Donation(ChatMessage),
    /// 配信タイトル・チャンネル名が判明した
    Metadata {
        title: Option<String>,
        channel: Option<String>,
    },
    /// 配信が終了した
    EndOfStream,
}

/// 購読中のイベントストリーム
///
/// `EndOfStream` を返さずに終わった場合は一時的な切断として扱われる。
pub type EventStream = BoxStream<'static, Result<UpstreamEvent, TransportError>>;

/// チャットイベントの取得元
///
/// プールが管理するリソース（ブラウザなど）を使って動画のチャットを購読する。
#[async_trait]
pub trait ChatEventSource: ResourceFactory {
    async fn subscribe(
        &self,
        resource: &Self::Resource,
        video_id: &VideoId,
    ) -> Result<EventStream, TransportError>;

    /// 購読を解除（失敗しても呼び出し側は気にしない）
    async fn unsubscribe(&self, resource: &Self::Resource, video_id: &VideoId);
}
