use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use fem_model::{
    FeatureEntity, FeatureRequest, FeatureRequestId, FeatureRequestStep,
    FeatureRequestType, FeatureUrn, Page, PageResult, RequestSelection,
    RequestSort, RequestSortField, SortDirection, TenantId,
};

use super::rows::FeatureRequestRow;
use crate::{
    database::ports::{FeatureRequestRepository, RequestStateUpdate},
    error::{FemError, Result},
};

const REQUEST_COLUMNS: &str = "r.id, r.request_type, r.request_id, r.request_owner, r.group_id, \
     r.urn, r.provider_id, r.session_owner, r.session, r.registration_date, r.last_update, \
     r.priority, r.state, r.step, r.errors, r.to_notify, r.payload";

#[derive(Clone, Debug)]
pub struct PostgresFeatureRequestRepository {
    pool: PgPool,
}

impl PostgresFeatureRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_where(
        &self,
        mut builder: QueryBuilder<'_, Postgres>,
        context: &'static str,
    ) -> Result<Vec<FeatureRequest>> {
        let rows: Vec<FeatureRequestRow> = builder
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(FemError::database(context))?;
        rows.into_iter().map(FeatureRequest::try_from).collect()
    }
}

/// Sort expression for a client-facing field. Creation and update requests
/// carry their provider id; the other kinds read it from the feature.
fn sort_expression(
    field: RequestSortField,
    request_type: FeatureRequestType,
) -> &'static str {
    match field {
        RequestSortField::ProviderId => match request_type {
            FeatureRequestType::Creation | FeatureRequestType::Update => {
                "r.provider_id"
            }
            _ => "COALESCE(r.provider_id, f.provider_id)",
        },
        RequestSortField::Source => "r.session_owner",
        RequestSortField::Session => "r.session",
        RequestSortField::RegistrationDate => "r.registration_date",
        RequestSortField::LastUpdate => "r.last_update",
        RequestSortField::State => "r.state",
        RequestSortField::Step => "r.step",
    }
}

fn push_selection(
    builder: &mut QueryBuilder<'_, Postgres>,
    tenant: &TenantId,
    request_type: FeatureRequestType,
    selection: &RequestSelection,
) {
    builder.push(
        " FROM feature_requests r \
         LEFT JOIN features f ON f.tenant = r.tenant AND f.urn = r.urn \
         WHERE r.tenant = ",
    );
    builder.push_bind(tenant.as_str().to_string());
    builder.push(" AND r.request_type = ");
    builder.push_bind(request_type.as_str());

    if let Some(ids) = &selection.ids {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.to_uuid()).collect();
        builder.push(" AND r.id = ANY(");
        builder.push_bind(ids);
        builder.push(")");
    }
    if let Some(state) = selection.state {
        builder.push(" AND r.state = ");
        builder.push_bind(state.as_str());
    }
    if let Some(step) = selection.step {
        builder.push(" AND r.step = ");
        builder.push_bind(step.as_str());
    }
    if let Some(source) = &selection.source {
        builder.push(" AND r.session_owner = ");
        builder.push_bind(source.clone());
    }
    if let Some(session) = &selection.session {
        builder.push(" AND r.session = ");
        builder.push_bind(session.clone());
    }
    if let Some(provider_id) = &selection.provider_id {
        builder.push(" AND COALESCE(r.provider_id, f.provider_id) = ");
        builder.push_bind(provider_id.clone());
    }
    if let Some(after) = selection.registered_after {
        builder.push(" AND r.registration_date >= ");
        builder.push_bind(after);
    }
    if let Some(before) = selection.registered_before {
        builder.push(" AND r.registration_date <= ");
        builder.push_bind(before);
    }
    if let Some(before) = selection.last_update_before {
        builder.push(" AND r.last_update < ");
        builder.push_bind(before);
    }
}

async fn insert_request_row(
    conn: &mut PgConnection,
    tenant: &TenantId,
    request: &FeatureRequest,
) -> Result<()> {
    let payload = serde_json::to_value(&request.payload)?;
    let to_notify = request
        .to_notify
        .as_ref()
        .map(serde_json::to_value)
        .transpose()?;
    let errors: Vec<String> = request.errors.iter().cloned().collect();

    sqlx::query(
        r#"
        INSERT INTO feature_requests (
            id, tenant, request_type, request_id, request_owner, group_id,
            urn, provider_id, session_owner, session, registration_date,
            last_update, priority, state, step, errors, to_notify, payload
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(request.id.to_uuid())
    .bind(tenant.as_str())
    .bind(request.request_type().as_str())
    .bind(&request.request_id)
    .bind(&request.request_owner)
    .bind(&request.group_id)
    .bind(request.urn.as_ref().map(ToString::to_string))
    .bind(&request.provider_id)
    .bind(&request.session_owner)
    .bind(&request.session)
    .bind(request.registration_date)
    .bind(request.last_update)
    .bind(request.priority.as_str())
    .bind(request.state.as_str())
    .bind(request.step.as_str())
    .bind(errors)
    .bind(to_notify)
    .bind(payload)
    .execute(conn)
    .await
    .map_err(FemError::database("insert feature request"))?;
    Ok(())
}

#[async_trait]
impl FeatureRequestRepository for PostgresFeatureRequestRepository {
    async fn insert_requests(
        &self,
        tenant: &TenantId,
        requests: Vec<FeatureRequest>,
    ) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(FemError::database("begin request insert tx"))?;

        for request in &requests {
            insert_request_row(&mut tx, tenant, request).await?;
        }

        tx.commit()
            .await
            .map_err(FemError::database("commit request insert tx"))
    }

    async fn find_by_ids(
        &self,
        tenant: &TenantId,
        ids: &[FeatureRequestId],
    ) -> Result<Vec<FeatureRequest>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.to_uuid()).collect();
        let mut builder = QueryBuilder::new("SELECT ");
        builder.push(REQUEST_COLUMNS);
        builder.push(" FROM feature_requests r WHERE r.tenant = ");
        builder.push_bind(tenant.as_str().to_string());
        builder.push(" AND r.id = ANY(");
        builder.push_bind(ids);
        builder.push(") ORDER BY r.id");
        self.fetch_where(builder, "find requests by id").await
    }

    async fn find_by_group_ids(
        &self,
        tenant: &TenantId,
        types: &[FeatureRequestType],
        group_ids: &[String],
    ) -> Result<Vec<FeatureRequest>> {
        let types: Vec<&'static str> =
            types.iter().map(FeatureRequestType::as_str).collect();
        let mut builder = QueryBuilder::new("SELECT ");
        builder.push(REQUEST_COLUMNS);
        builder.push(" FROM feature_requests r WHERE r.tenant = ");
        builder.push_bind(tenant.as_str().to_string());
        builder.push(" AND r.request_type = ANY(");
        builder.push_bind(types);
        builder.push(") AND r.group_id = ANY(");
        builder.push_bind(group_ids.to_vec());
        builder.push(") ORDER BY r.id");
        self.fetch_where(builder, "find requests by group id").await
    }

    async fn find_by_request_ids(
        &self,
        tenant: &TenantId,
        request_ids: &[String],
    ) -> Result<Vec<FeatureRequest>> {
        let mut builder = QueryBuilder::new("SELECT ");
        builder.push(REQUEST_COLUMNS);
        builder.push(" FROM feature_requests r WHERE r.tenant = ");
        builder.push_bind(tenant.as_str().to_string());
        builder.push(" AND r.request_id = ANY(");
        builder.push_bind(request_ids.to_vec());
        builder.push(") ORDER BY r.id");
        self.fetch_where(builder, "find requests by request id").await
    }

    async fn update_state_and_step(
        &self,
        tenant: &TenantId,
        update: RequestStateUpdate,
    ) -> Result<u64> {
        if update.ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = update.ids.iter().map(|id| id.to_uuid()).collect();
        let result = sqlx::query(
            r#"
            UPDATE feature_requests
            SET state = $3,
                step = $4,
                errors = ARRAY(
                    SELECT DISTINCT e FROM unnest(
                        (CASE WHEN $6 THEN '{}'::text[] ELSE errors END)
                        || COALESCE(ARRAY[$5::text], '{}'::text[])
                    ) AS e
                    WHERE e IS NOT NULL
                    ORDER BY e
                ),
                last_update = NOW()
            WHERE tenant = $1 AND id = ANY($2)
            "#,
        )
        .bind(tenant.as_str())
        .bind(ids)
        .bind(update.state.as_str())
        .bind(update.step.as_str())
        .bind(update.error)
        .bind(update.clear_errors)
        .execute(self.pool())
        .await
        .map_err(FemError::database("update request state and step"))?;
        Ok(result.rows_affected())
    }

    async fn mark_to_notify(
        &self,
        tenant: &TenantId,
        id: FeatureRequestId,
        snapshot: Option<FeatureEntity>,
    ) -> Result<()> {
        let snapshot = snapshot.as_ref().map(serde_json::to_value).transpose()?;
        sqlx::query(
            r#"
            UPDATE feature_requests
            SET step = $3, to_notify = $4, last_update = NOW()
            WHERE tenant = $1 AND id = $2
            "#,
        )
        .bind(tenant.as_str())
        .bind(id.to_uuid())
        .bind(FeatureRequestStep::LocalToBeNotified.as_str())
        .bind(snapshot)
        .execute(self.pool())
        .await
        .map_err(FemError::database("mark request to notify"))?;
        Ok(())
    }

    async fn move_step_for_urns(
        &self,
        tenant: &TenantId,
        types: &[FeatureRequestType],
        urns: &[FeatureUrn],
        from: FeatureRequestStep,
        to: FeatureRequestStep,
    ) -> Result<u64> {
        let types: Vec<&'static str> =
            types.iter().map(FeatureRequestType::as_str).collect();
        let urns: Vec<String> = urns.iter().map(ToString::to_string).collect();
        let result = sqlx::query(
            r#"
            UPDATE feature_requests
            SET step = $5, last_update = NOW()
            WHERE tenant = $1
              AND request_type = ANY($2)
              AND urn = ANY($3)
              AND step = $4
            "#,
        )
        .bind(tenant.as_str())
        .bind(types)
        .bind(urns)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(self.pool())
        .await
        .map_err(FemError::database("move request step by urn"))?;
        Ok(result.rows_affected())
    }

    async fn delete_requests(
        &self,
        tenant: &TenantId,
        ids: &[FeatureRequestId],
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = ids.iter().map(|id| id.to_uuid()).collect();
        let result = sqlx::query(
            "DELETE FROM feature_requests WHERE tenant = $1 AND id = ANY($2)",
        )
        .bind(tenant.as_str())
        .bind(ids)
        .execute(self.pool())
        .await
        .map_err(FemError::database("delete feature requests"))?;
        Ok(result.rows_affected())
    }

    async fn replace_request(
        &self,
        tenant: &TenantId,
        old: FeatureRequestId,
        new: FeatureRequest,
    ) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(FemError::database("begin request replace tx"))?;

        sqlx::query("DELETE FROM feature_requests WHERE tenant = $1 AND id = $2")
            .bind(tenant.as_str())
            .bind(old.to_uuid())
            .execute(&mut *tx)
            .await
            .map_err(FemError::database("delete replaced request"))?;
        insert_request_row(&mut tx, tenant, &new).await?;

        tx.commit()
            .await
            .map_err(FemError::database("commit request replace tx"))
    }

    async fn list_requests(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
        sort: RequestSort,
        page: Page,
    ) -> Result<PageResult<FeatureRequest>> {
        let total = self.count_requests(tenant, request_type, selection).await?;

        let direction = match sort.direction {
            SortDirection::Asc => " ASC",
            SortDirection::Desc => " DESC",
        };
        let mut builder = QueryBuilder::new("SELECT ");
        builder.push(REQUEST_COLUMNS);
        push_selection(&mut builder, tenant, request_type, selection);
        builder.push(" ORDER BY ");
        builder.push(sort_expression(sort.field, request_type));
        builder.push(direction);
        builder.push(", r.id");
        builder.push(direction);
        builder.push(" LIMIT ");
        builder.push_bind(i64::from(page.limit));
        builder.push(" OFFSET ");
        builder.push_bind(i64::try_from(page.offset).unwrap_or(i64::MAX));

        let items = self.fetch_where(builder, "list feature requests").await?;
        Ok(PageResult { items, total })
    }

    async fn count_requests(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
    ) -> Result<u64> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*)");
        push_selection(&mut builder, tenant, request_type, selection);
        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(FemError::database("count feature requests"))?;
        Ok(count.max(0) as u64)
    }
}
