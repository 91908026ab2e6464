mod invoice_impl;
