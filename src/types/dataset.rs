//! Tabular transaction data shared by training, scoring and persistence

use serde::{Deserialize, Serialize};

/// Feature columns every scoring input must carry, in model input order.
pub const REQUIRED_FEATURES: [&str; 9] = [
    "step",
    "customer",
    "age",
    "gender",
    "zipcodeOri",
    "merchant",
    "zipMerchant",
    "category",
    "amount",
];

/// Label column for training data
pub const LABEL_COLUMN: &str = "fraud";

/// A single transaction row. Every field is optional so that a dataset can
/// describe which columns its source actually provided.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    /// Simulation time unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,

    /// Age bucket (categorical)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    /// Customer zip code
    #[serde(default, rename = "zipcodeOri", skip_serializing_if = "Option::is_none")]
    pub zipcode_ori: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,

    /// Merchant zip code
    #[serde(default, rename = "zipMerchant", skip_serializing_if = "Option::is_none")]
    pub zip_merchant: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,

    /// Known outcome (0 = legitimate, 1 = fraud)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraud: Option<i64>,
}

impl TransactionRow {
    /// Build a fully populated, unlabeled row.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        step: i64,
        customer: &str,
        age: &str,
        gender: &str,
        zipcode_ori: &str,
        merchant: &str,
        zip_merchant: &str,
        category: &str,
        amount: f64,
    ) -> Self {
        Self {
            step: Some(step),
            customer: Some(customer.to_string()),
            age: Some(age.to_string()),
            gender: Some(gender.to_string()),
            zipcode_ori: Some(zipcode_ori.to_string()),
            merchant: Some(merchant.to_string()),
            zip_merchant: Some(zip_merchant.to_string()),
            category: Some(category.to_string()),
            amount: Some(amount),
            fraud: None,
        }
    }

    /// Attach a label
    pub fn with_fraud(mut self, fraud: i64) -> Self {
        self.fraud = Some(fraud);
        self
    }

    /// Whether this row carries a value for the named column.
    pub fn has(&self, column: &str) -> bool {
        match column {
            "step" => self.step.is_some(),
            "customer" => self.customer.is_some(),
            "age" => self.age.is_some(),
            "gender" => self.gender.is_some(),
            "zipcodeOri" => self.zipcode_ori.is_some(),
            "merchant" => self.merchant.is_some(),
            "zipMerchant" => self.zip_merchant.is_some(),
            "category" => self.category.is_some(),
            "amount" => self.amount.is_some(),
            "fraud" => self.fraud.is_some(),
            _ => false,
        }
    }

    /// Categorical value for one of the string columns.
    pub fn categorical(&self, column: &str) -> Option<&str> {
        let value = match column {
            "customer" => &self.customer,
            "age" => &self.age,
            "gender" => &self.gender,
            "zipcodeOri" => &self.zipcode_ori,
            "merchant" => &self.merchant,
            "zipMerchant" => &self.zip_merchant,
            "category" => &self.category,
            _ => return None,
        };
        value.as_deref()
    }
}

/// Ordered collection of transaction rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularDataset {
    pub rows: Vec<TransactionRow>,
}

impl TabularDataset {
    pub fn new(rows: Vec<TransactionRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A column is present when every row carries a value for it.
    pub fn has_column(&self, column: &str) -> bool {
        self.rows.iter().all(|row| row.has(column))
    }

    /// Required feature columns this dataset lacks, in required order.
    pub fn missing_features(&self) -> Vec<String> {
        REQUIRED_FEATURES
            .iter()
            .filter(|column| !self.has_column(column))
            .map(|column| column.to_string())
            .collect()
    }

    /// Whether the dataset carries a usable label column.
    pub fn is_labeled(&self) -> bool {
        !self.rows.is_empty() && self.has_column(LABEL_COLUMN)
    }

    /// Labels as 0/1, if every row carries one.
    pub fn labels(&self) -> Option<Vec<u8>> {
        self.rows
            .iter()
            .map(|row| match row.fraud {
                Some(0) => Some(0),
                Some(1) => Some(1),
                _ => None,
            })
            .collect()
    }

    /// Append all rows of another dataset, preserving order.
    pub fn extend(&mut self, other: TabularDataset) {
        self.rows.extend(other.rows);
    }
}

impl From<Vec<TransactionRow>> for TabularDataset {
    fn from(rows: Vec<TransactionRow>) -> Self {
        Self::new(rows)
    }
}
