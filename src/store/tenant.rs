use super::{
    BotConfig, MessagePayload, NewProduct, Product, Room, Sender, StoreError, StoredMessage,
    blocking, now_us, sqlite_url,
};
use crate::entity::{bot_configs, messages, products, rooms};
use crate::pipeline::Attributes;
use crate::tenant::TenantSlug;
use sea_orm::*;
use std::path::Path;
use tracing::info;

#[derive(Debug)]
pub struct TenantStore {
    slug: TenantSlug,
    db_url: String,
}

impl TenantStore {
    pub(crate) fn new(slug: TenantSlug, path: &Path) -> Self {
        Self {
            slug,
            db_url: sqlite_url(path),
        }
    }

    pub fn slug(&self) -> &TenantSlug {
        &self.slug
    }

    pub(crate) async fn apply_schema(&self) -> Result<(), StoreError> {
        blocking(&self.db_url, |db| {
            db.get_schema_builder()
                .register(bot_configs::Entity)
                .register(rooms::Entity)
                .register(messages::Entity)
                .register(products::Entity)
                .apply(db)?;
            Ok(())
        })
        .await
    }

    pub async fn bot_config(&self) -> Result<Option<BotConfig>, StoreError> {
        blocking(&self.db_url, |db| {
            bot_configs::Entity::find()
                .order_by_desc(bot_configs::Column::UpdatedAtUs)
                .one(db)?
                .map(BotConfig::try_from)
                .transpose()
        })
        .await
    }

    pub async fn replace_bot_config(&self, config: &BotConfig) -> Result<(), StoreError> {
        let record = bot_configs::ActiveModel {
            rowid: NotSet,
            name: Set(config.name.clone()),
            system_prompt: Set(config.system_prompt.clone()),
            intent_examples: Set(serde_json::to_string(&config.intent_examples)?),
            attribute_extraction_prompt: Set(config.attribute_extraction_prompt.clone()),
            required_attributes: Set(serde_json::to_string(&config.required_attributes)?),
            product_recommendation_prompt: Set(config.product_recommendation_prompt.clone()),
            updated_at_us: Set(now_us()),
        };

        blocking(&self.db_url, move |db| {
            let txn = db.begin()?;
            bot_configs::Entity::delete_many().exec(&txn)?;
            bot_configs::Entity::insert(record).exec(&txn)?;
            txn.commit()?;
            Ok(())
        })
        .await?;

        info!("Replaced bot configuration for tenant {}", self.slug);
        Ok(())
    }

    pub async fn create_room(&self, owner: &str) -> Result<Room, StoreError> {
        let room = Room {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            extracted_attributes: Attributes::new(),
            missing_attributes: Vec::new(),
            created_at_us: now_us(),
        };

        let record = rooms::ActiveModel {
            rowid: NotSet,
            id: Set(room.id.clone()),
            owner: Set(room.owner.clone()),
            extracted_attributes: Set(serde_json::to_string(&room.extracted_attributes)?),
            missing_attributes: Set(serde_json::to_string(&room.missing_attributes)?),
            created_at_us: Set(room.created_at_us),
        };

        blocking(&self.db_url, move |db| {
            rooms::Entity::insert(record).exec(db)?;
            Ok(())
        })
        .await?;

        info!("Created room {} for tenant {}", room.id, self.slug);
        Ok(room)
    }

    pub async fn find_room(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        let room_id = room_id.to_string();
        blocking(&self.db_url, move |db| {
            rooms::Entity::find()
                .filter(rooms::Column::Id.eq(room_id))
                .one(db)?
                .map(Room::try_from)
                .transpose()
        })
        .await
    }

    pub async fn append_message(
        &self,
        room_id: &str,
        sender: Sender,
        payload: &MessagePayload,
    ) -> Result<StoredMessage, StoreError> {
        let timestamp_us = now_us();
        let record = message_record(room_id, sender, payload, timestamp_us)?;
        let stored = StoredMessage {
            sender,
            payload: payload.clone(),
            timestamp_us,
        };

        blocking(&self.db_url, move |db| {
            messages::Entity::insert(record).exec(db)?;
            Ok(())
        })
        .await?;

        Ok(stored)
    }

    /// All messages of a room, oldest first. Creation time is the only
    /// ordering; the rowid breaks ties between same-microsecond writes.
    pub async fn messages(&self, room_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let room_id = room_id.to_string();
        blocking(&self.db_url, move |db| {
            messages::Entity::find()
                .filter(messages::Column::RoomId.eq(room_id))
                .order_by_asc(messages::Column::TimestampUs)
                .order_by_asc(messages::Column::Rowid)
                .all(db)?
                .into_iter()
                .map(StoredMessage::try_from)
                .collect()
        })
        .await
    }

    /// Writes the bot's reply and the room's attribute state in one
    /// transaction, so a failed turn leaves neither behind.
    pub async fn complete_turn(
        &self,
        room_id: &str,
        reply: &MessagePayload,
        extracted: &Attributes,
        missing: &[String],
    ) -> Result<(), StoreError> {
        let record = message_record(room_id, Sender::Bot, reply, now_us())?;
        let room_id = room_id.to_string();
        let extracted = serde_json::to_string(extracted)?;
        let missing = serde_json::to_string(missing)?;

        blocking(&self.db_url, move |db| {
            let txn = db.begin()?;
            let room = rooms::Entity::find()
                .filter(rooms::Column::Id.eq(room_id.as_str()))
                .one(&txn)?
                .ok_or_else(|| StoreError::NotFound(format!("Room {}", room_id)))?;

            messages::Entity::insert(record).exec(&txn)?;

            let mut room: rooms::ActiveModel = room.into();
            room.extracted_attributes = Set(extracted);
            room.missing_attributes = Set(missing);
            room.update(&txn)?;

            txn.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn insert_product(&self, product: NewProduct) -> Result<i64, StoreError> {
        let created_at_us = product
            .created_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp_micros())
            .unwrap_or_else(now_us);
        let embedding = product
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let record = products::ActiveModel {
            rowid: NotSet,
            name: Set(product.name),
            price: Set(product.price),
            attributes: Set(serde_json::to_string(&product.attributes)?),
            image: Set(product.image),
            embedding: Set(embedding),
            created_at_us: Set(created_at_us),
        };

        blocking(&self.db_url, move |db| {
            let result = products::Entity::insert(record).exec(db)?;
            Ok(result.last_insert_id)
        })
        .await
    }

    pub async fn products(&self) -> Result<Vec<Product>, StoreError> {
        self.load_products(None).await
    }

    pub async fn embedded_products(&self) -> Result<Vec<Product>, StoreError> {
        self.load_products(Some(true)).await
    }

    pub async fn products_missing_embedding(&self) -> Result<Vec<Product>, StoreError> {
        self.load_products(Some(false)).await
    }

    async fn load_products(&self, embedded: Option<bool>) -> Result<Vec<Product>, StoreError> {
        blocking(&self.db_url, move |db| {
            let mut query = products::Entity::find();
            query = match embedded {
                Some(true) => query.filter(products::Column::Embedding.is_not_null()),
                Some(false) => query.filter(products::Column::Embedding.is_null()),
                None => query,
            };
            query
                .order_by_asc(products::Column::Rowid)
                .all(db)?
                .into_iter()
                .map(Product::try_from)
                .collect()
        })
        .await
    }

    pub async fn set_product_embedding(&self, id: i64, embedding: &[f32]) -> Result<(), StoreError> {
        let embedding = serde_json::to_string(embedding)?;
        blocking(&self.db_url, move |db| {
            let product = products::Entity::find_by_id(id)
                .one(db)?
                .ok_or_else(|| StoreError::NotFound(format!("Product {}", id)))?;
            let mut product: products::ActiveModel = product.into();
            product.embedding = Set(Some(embedding));
            product.update(db)?;
            Ok(())
        })
        .await
    }
}

fn message_record(
    room_id: &str,
    sender: Sender,
    payload: &MessagePayload,
    timestamp_us: i64,
) -> Result<messages::ActiveModel, StoreError> {
    Ok(messages::ActiveModel {
        rowid: NotSet,
        room_id: Set(room_id.to_string()),
        sender: Set(sender.as_str().to_string()),
        payload: Set(serde_json::to_string(payload)?),
        timestamp_us: Set(timestamp_us),
    })
}
