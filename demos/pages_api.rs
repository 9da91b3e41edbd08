//! Pages API demonstrating hooks, filters and soft delete
//!
//! ```text
//! cargo run --example pages_api
//! curl -X POST localhost:3000/api/pages -H 'x-api-key: dev' -d '{"content":"hello","rank":3}'
//! curl 'localhost:3000/api/pages?$gte_rank=2&_sort=-rank'
//! ```

use docrest::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Page {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    rank: i64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

impl Validatable for Page {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.content.trim().is_empty() {
            errors.push("Content is required".to_string());
        }
        if self.rank < 0 {
            errors.push("Rank must not be negative".to_string());
        }
        errors
    }
}

impl Identifiable for Page {
    fn id(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }
}

impl Model for Page {
    fn field_kind(&self, field: &str) -> FieldKind {
        match field {
            "_id" => FieldKind::ObjectId,
            "rank" => FieldKind::Integer,
            "createdAt" => FieldKind::Timestamp,
            _ => FieldKind::Other,
        }
    }

    fn as_validatable(&self) -> Option<&dyn Validatable> {
        Some(self)
    }

    fn as_identifiable(&mut self) -> Option<&mut dyn Identifiable> {
        Some(self)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,docrest=debug")))
        .init();

    let config = ServiceConfig::from_yaml_str(
        r#"
bind: "127.0.0.1:3000"
cors_origins: ["http://localhost:5173"]
endpoints:
  pages:
    uri: /api/pages
    query_params: [content, $regexi_content, $in_tags, $gte_rank, $lte_rank, $gtdate_createdAt]
    soft_delete: true
    pagination:
      per_page: 20
      sort: ["-rank"]
"#,
    )?;

    let db: Arc<dyn Database> = Arc::new(InMemoryDatabase::new());
    let pages = config
        .endpoint("pages")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("pages endpoint missing from config"))?;

    let endpoint = Endpoint::from_config(pages, db, Page::default)
        .pre_save(Operation::Create, |_: &RequestContext, _: Operation, page: &mut Page| -> HookResult {
            page.created_at.get_or_insert_with(Utc::now);
            Ok(())
        })
        .middleware(OperationSet::WRITE, |request: Request, next: Next| async move {
            if request.headers().contains_key("x-api-key") {
                next.run(request).await
            } else {
                (StatusCode::UNAUTHORIZED, axum::Json(ErrorEnvelope::single("Missing API key"))).into_response()
            }
        })
        .post_write(OperationSet::WRITE, |ctx: &RequestContext, op: Operation, page: &Page| -> HookResult {
            tracing::info!(request_id = %ctx.request_id, operation = %op, id = ?page.id, "page written");
            Ok(())
        });

    let mut server = ServerBuilder::new().register(endpoint);
    if let Some(cors) = config.cors_layer() {
        server = server.with_cors(cors);
    }
    server.serve(&config.bind).await
}
