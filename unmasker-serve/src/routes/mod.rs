pub(crate) mod fill_mask;
