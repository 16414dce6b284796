use super::convert::json_to_value;
use super::models::{
    CollectionSelector, CompositeFilter, CompositeOperator, FieldFilter, FieldOperator,
    FieldOrder, FieldReference, OrderDirection, QueryFilter, StructuredQuery,
};
use crate::store::{Direction, FilterOp, Query, StoreError};

/// Builds the REST structured query for `query`; several filters become an AND composite.
pub fn structured_query(query: &Query) -> Result<StructuredQuery, StoreError> {
    let mut filters = query
        .filters
        .iter()
        .map(|filter| {
            Ok(QueryFilter::FieldFilter(FieldFilter {
                field: FieldReference {
                    field_path: filter.field.clone(),
                },
                op: match filter.op {
                    FilterOp::Equal => FieldOperator::Equal,
                    FilterOp::ArrayContains => FieldOperator::ArrayContains,
                },
                value: json_to_value(filter.value.clone())?,
            }))
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    let where_clause = match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(QueryFilter::CompositeFilter(CompositeFilter {
            op: CompositeOperator::And,
            filters,
        })),
    };

    let order_by = query
        .order_by
        .iter()
        .map(|order| FieldOrder {
            field: FieldReference {
                field_path: order.field.clone(),
            },
            direction: match order.direction {
                Direction::Ascending => OrderDirection::Ascending,
                Direction::Descending => OrderDirection::Descending,
            },
        })
        .collect();

    Ok(StructuredQuery {
        from: vec![CollectionSelector {
            collection_id: query.collection_id.clone(),
        }],
        where_clause,
        order_by,
        limit: query.limit,
    })
}
