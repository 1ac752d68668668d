use std::marker::PhantomData;

use sqlx::{
    postgres::PgArguments, Arguments, Encode, Executor, FromRow, Postgres, QueryBuilder, Type,
};

use crate::{
    cursor::{Cursor, CursorOrder, CursorType},
    error::QueryError,
    Edge, PageInfo, QueryArgs, QueryResult,
};

/// Keyset paged `SELECT` against Postgres.
///
/// The base sql may carry its own `WHERE` clause and positional binds; the cursor
/// predicate is appended after them and its placeholders continue the numbering.
pub struct PgQuery<'q, O>
where
    O: for<'r> FromRow<'r, <sqlx::Postgres as sqlx::Database>::Row>,
    O: 'q + std::marker::Send,
    O: 'q + Unpin,
    O: 'q + Cursor,
{
    builder: QueryBuilder<'q, Postgres>,
    phantom: PhantomData<&'q O>,
    cursor: Option<CursorType>,
    order: CursorOrder,
    limit: u16,
    bind_pos: usize,
    arguments: PgArguments,
}

impl<'q, O> PgQuery<'q, O>
where
    O: for<'r> FromRow<'r, <sqlx::Postgres as sqlx::Database>::Row>,
    O: 'q + std::marker::Send,
    O: 'q + Unpin,
    O: 'q + Cursor,
{
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            builder: QueryBuilder::new(sql),
            phantom: PhantomData,
            cursor: None,
            order: CursorOrder::Asc,
            limit: 0,
            bind_pos: 1,
            arguments: PgArguments::default(),
        }
    }

    pub fn bind<T: 'q + Send + Encode<'q, Postgres> + Type<Postgres>>(mut self, value: T) -> Self {
        // PgArguments::add only fails when the value cannot be encoded, which sqlx
        // reports again at execution time.
        let _ = self.arguments.add(value);
        self.bind_pos += 1;
        self
    }

    pub fn order(mut self, value: CursorOrder) -> Self {
        self.order = value;
        self
    }

    pub fn forward(self, first: u16, after: Option<CursorType>) -> Self {
        self.build(QueryArgs::forward(first, after))
    }

    pub fn build(mut self, args: QueryArgs) -> Self {
        if args.after.is_some() {
            let filter = O::to_pg_filter(self.order, self.bind_pos);

            let filter = if self.builder.sql().contains(" WHERE ") {
                format!(" AND ({filter})")
            } else {
                format!(" WHERE {filter}")
            };

            self.builder.push(filter);
        }

        let order = O::to_pg_order(self.order);
        self.builder
            .push(format!(" ORDER BY {order} LIMIT {}", u32::from(args.first) + 1));

        self.cursor = args.after;
        self.limit = args.first;

        self
    }

    pub async fn fetch_all<E>(self, executor: E) -> Result<QueryResult<O>, QueryError>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let mut query = sqlx::query_as_with::<_, O, _>(self.builder.sql(), self.arguments);

        if let Some(cursor) = &self.cursor {
            let cursor = O::from_cursor(cursor)?;
            query = cursor.bind(query);
        }

        let mut rows = query.fetch_all(executor).await?;
        let has_next_page = rows.len() > usize::from(self.limit);

        if has_next_page {
            rows.pop();
        }

        let edges = rows.into_iter().map(Edge::from).collect::<Vec<_>>();
        let page_info = PageInfo {
            has_next_page,
            end_cursor: edges.last().map(|edge| edge.cursor.clone()),
        };

        Ok(QueryResult { edges, page_info })
    }
}
