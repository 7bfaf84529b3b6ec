pub mod bert;
pub mod roberta;
