use std::collections::HashMap;

use crate::domain::product::{Product, ProductId};

/// Point-in-time view of the active catalog used for one pricing pass.
///
/// Built from a single read; later catalog writes are not observed.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    products: HashMap<ProductId, Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        let products = products
            .into_iter()
            .filter(|product| product.active)
            .map(|product| (product.id, product))
            .collect();
        Self { products }
    }

    pub fn find(&self, product_id: &ProductId) -> Option<&Product> {
        self.products.get(product_id)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}
