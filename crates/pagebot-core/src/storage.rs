//! PostgreSQL store using Diesel
//!
//! One connection behind a mutex, shared by every collaborator trait the
//! pipeline needs from the database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::collaborators::{Catalog, ConversationLog, LeadTracker, PageTokens, TakeoverStore};
use crate::model::{ContactInfo, Lead, PaymentMethod, PipelineStage, Product, Property};
use crate::schema::{
    human_takeovers, lead_activity, lead_stage_history, leads, messages, page_tokens,
    payment_methods, products, properties,
};

/// Activity rows considered when estimating the best contact hour
const ACTIVITY_WINDOW: i64 = 200;

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = products)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    category: Option<String>,
    price: Option<f64>,
    image_url: Option<String>,
    product_url: Option<String>,
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Product {
            id: r.id,
            name: r.name,
            description: r.description,
            category: r.category,
            price: r.price,
            image_url: r.image_url,
            product_url: r.product_url,
        }
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = properties)]
struct PropertyRow {
    id: Uuid,
    title: String,
    property_type: Option<String>,
    location: Option<String>,
    price: Option<f64>,
    bedrooms: Option<i32>,
    image_url: Option<String>,
    listing_url: Option<String>,
}

impl From<PropertyRow> for Property {
    fn from(r: PropertyRow) -> Self {
        Property {
            id: r.id,
            title: r.title,
            property_type: r.property_type,
            location: r.location,
            price: r.price,
            bedrooms: r.bedrooms,
            image_url: r.image_url,
            listing_url: r.listing_url,
        }
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = payment_methods)]
struct PaymentMethodRow {
    id: Uuid,
    name: String,
    account_name: Option<String>,
    account_number: Option<String>,
    qr_code_url: Option<String>,
    instructions: Option<String>,
}

impl From<PaymentMethodRow> for PaymentMethod {
    fn from(r: PaymentMethodRow) -> Self {
        PaymentMethod {
            id: r.id,
            name: r.name,
            account_name: r.account_name,
            account_number: r.account_number,
            qr_code_url: r.qr_code_url,
            instructions: r.instructions,
        }
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = leads)]
struct LeadRow {
    id: Uuid,
    sender_id: String,
    page_id: String,
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    message_count: i32,
    stage: String,
    referral_source: Option<String>,
    best_contact_hour: Option<i32>,
}

impl TryFrom<LeadRow> for Lead {
    type Error = anyhow::Error;

    fn try_from(r: LeadRow) -> Result<Self> {
        Ok(Lead {
            stage: PipelineStage::from_str(&r.stage)?,
            id: r.id,
            sender_id: r.sender_id,
            page_id: r.page_id,
            name: r.name,
            phone: r.phone,
            email: r.email,
            message_count: r.message_count,
            referral_source: r.referral_source,
            best_contact_hour: r.best_contact_hour,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = leads)]
struct NewLead<'a> {
    id: Uuid,
    sender_id: &'a str,
    page_id: &'a str,
}

/// `None` fields are left untouched
#[derive(AsChangeset)]
#[diesel(table_name = leads)]
struct ContactChanges<'a> {
    phone: Option<&'a str>,
    email: Option<&'a str>,
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
struct NewMessage<'a> {
    id: Uuid,
    sender_id: &'a str,
    page_id: &'a str,
    role: &'a str,
    content: &'a str,
}

pub struct PgStore {
    conn: Mutex<PgConnection>,
}

impl PgStore {
    pub fn new(database_url: &str) -> Result<Self> {
        let conn = PgConnection::establish(database_url)
            .context("Failed to connect to database")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, PgConnection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }
}

#[async_trait]
impl PageTokens for PgStore {
    async fn access_token(&self, page_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn()?;
        let token = page_tokens::table
            .find(page_id)
            .select(page_tokens::access_token)
            .first::<String>(&mut *conn)
            .optional()?;
        Ok(token)
    }
}

#[async_trait]
impl Catalog for PgStore {
    async fn products(&self, page_id: &str) -> Result<Vec<Product>> {
        let mut conn = self.conn()?;
        let rows: Vec<ProductRow> = products::table
            .filter(products::page_id.eq(page_id))
            .filter(products::active.eq(true))
            .order(products::created_at.desc())
            .select(ProductRow::as_select())
            .load(&mut *conn)?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn properties(&self, page_id: &str) -> Result<Vec<Property>> {
        let mut conn = self.conn()?;
        let rows: Vec<PropertyRow> = properties::table
            .filter(properties::page_id.eq(page_id))
            .filter(properties::active.eq(true))
            .order(properties::created_at.desc())
            .select(PropertyRow::as_select())
            .load(&mut *conn)?;
        Ok(rows.into_iter().map(Property::from).collect())
    }

    async fn payment_methods(&self, page_id: &str) -> Result<Vec<PaymentMethod>> {
        let mut conn = self.conn()?;
        let rows: Vec<PaymentMethodRow> = payment_methods::table
            .filter(payment_methods::page_id.eq(page_id))
            .filter(payment_methods::active.eq(true))
            .order((payment_methods::sort_order.asc(), payment_methods::created_at.asc()))
            .select(PaymentMethodRow::as_select())
            .load(&mut *conn)?;
        Ok(rows.into_iter().map(PaymentMethod::from).collect())
    }

    async fn property(&self, page_id: &str, id: Uuid) -> Result<Option<Property>> {
        let mut conn = self.conn()?;
        let row = properties::table
            .find(id)
            .filter(properties::page_id.eq(page_id))
            .select(PropertyRow::as_select())
            .first(&mut *conn)
            .optional()?;
        Ok(row.map(Property::from))
    }

    async fn payment_method(&self, page_id: &str, id: Uuid) -> Result<Option<PaymentMethod>> {
        let mut conn = self.conn()?;
        let row = payment_methods::table
            .find(id)
            .filter(payment_methods::page_id.eq(page_id))
            .filter(payment_methods::active.eq(true))
            .select(PaymentMethodRow::as_select())
            .first(&mut *conn)
            .optional()?;
        Ok(row.map(PaymentMethod::from))
    }
}

#[async_trait]
impl LeadTracker for PgStore {
    async fn get_or_create(&self, sender_id: &str, page_id: &str) -> Result<Lead> {
        let mut conn = self.conn()?;

        diesel::insert_into(leads::table)
            .values(&NewLead {
                id: Uuid::new_v4(),
                sender_id,
                page_id,
            })
            .on_conflict((leads::sender_id, leads::page_id))
            .do_nothing()
            .execute(&mut *conn)?;

        let row: LeadRow = leads::table
            .filter(leads::sender_id.eq(sender_id))
            .filter(leads::page_id.eq(page_id))
            .select(LeadRow::as_select())
            .first(&mut *conn)?;
        Lead::try_from(row)
    }

    async fn increment_message_count(&self, lead_id: Uuid) -> Result<i32> {
        let mut conn = self.conn()?;
        let count = diesel::update(leads::table.find(lead_id))
            .set((
                leads::message_count.eq(leads::message_count + 1),
                leads::updated_at.eq(Utc::now()),
            ))
            .returning(leads::message_count)
            .get_result::<i32>(&mut *conn)?;
        Ok(count)
    }

    async fn set_stage(&self, lead_id: Uuid, stage: PipelineStage, reason: &str) -> Result<()> {
        let mut conn = self.conn()?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::update(leads::table.find(lead_id))
                .set((
                    leads::stage.eq(stage.as_str()),
                    leads::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            diesel::insert_into(lead_stage_history::table)
                .values((
                    lead_stage_history::id.eq(Uuid::new_v4()),
                    lead_stage_history::lead_id.eq(lead_id),
                    lead_stage_history::stage.eq(stage.as_str()),
                    lead_stage_history::reason.eq(reason),
                ))
                .execute(conn)?;
            Ok(())
        })?;
        Ok(())
    }

    async fn set_name(&self, lead_id: Uuid, name: &str) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::update(leads::table.find(lead_id))
            .set((leads::name.eq(name), leads::updated_at.eq(Utc::now())))
            .execute(&mut *conn)?;
        Ok(())
    }

    async fn set_contact(&self, lead_id: Uuid, contact: &ContactInfo) -> Result<()> {
        if contact.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        diesel::update(leads::table.find(lead_id))
            .set(&ContactChanges {
                phone: contact.phone.as_deref(),
                email: contact.email.as_deref(),
            })
            .execute(&mut *conn)?;
        Ok(())
    }

    async fn set_referral(&self, lead_id: Uuid, source: &str) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::update(leads::table.find(lead_id))
            .set((
                leads::referral_source.eq(source),
                leads::updated_at.eq(Utc::now()),
            ))
            .execute(&mut *conn)?;
        Ok(())
    }

    async fn record_activity(&self, lead_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(lead_activity::table)
            .values((
                lead_activity::id.eq(Uuid::new_v4()),
                lead_activity::lead_id.eq(lead_id),
                lead_activity::occurred_at.eq(at),
            ))
            .execute(&mut *conn)?;
        Ok(())
    }

    async fn activity_times(&self, lead_id: Uuid) -> Result<Vec<DateTime<Utc>>> {
        let mut conn = self.conn()?;
        let times = lead_activity::table
            .filter(lead_activity::lead_id.eq(lead_id))
            .order(lead_activity::occurred_at.desc())
            .limit(ACTIVITY_WINDOW)
            .select(lead_activity::occurred_at)
            .load::<DateTime<Utc>>(&mut *conn)?;
        Ok(times)
    }

    async fn set_best_contact_hour(&self, lead_id: Uuid, hour: Option<u32>) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::update(leads::table.find(lead_id))
            .set(leads::best_contact_hour.eq(hour.map(|h| h as i32)))
            .execute(&mut *conn)?;
        Ok(())
    }
}

#[async_trait]
impl TakeoverStore for PgStore {
    async fn last_human_activity(&self, sender_id: &str) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.conn()?;
        let at = human_takeovers::table
            .find(sender_id)
            .select(human_takeovers::last_human_at)
            .first::<DateTime<Utc>>(&mut *conn)
            .optional()?;
        Ok(at)
    }

    async fn record_human_activity(&self, sender_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(human_takeovers::table)
            .values((
                human_takeovers::sender_id.eq(sender_id),
                human_takeovers::last_human_at.eq(at),
            ))
            .on_conflict(human_takeovers::sender_id)
            .do_update()
            .set(human_takeovers::last_human_at.eq(at))
            .execute(&mut *conn)?;
        Ok(())
    }
}

#[async_trait]
impl ConversationLog for PgStore {
    async fn append(
        &self,
        sender_id: &str,
        page_id: &str,
        role: &str,
        content: &str,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(messages::table)
            .values(&NewMessage {
                id: Uuid::new_v4(),
                sender_id,
                page_id,
                role,
                content,
            })
            .execute(&mut *conn)?;
        Ok(())
    }

    async fn recent(&self, sender_id: &str, limit: i64) -> Result<Vec<(String, String)>> {
        let mut conn = self.conn()?;
        let mut turns = messages::table
            .filter(messages::sender_id.eq(sender_id))
            .order(messages::created_at.desc())
            .limit(limit)
            .select((messages::role, messages::content))
            .load::<(String, String)>(&mut *conn)?;

        // Oldest first
        turns.reverse();
        Ok(turns)
    }
}
